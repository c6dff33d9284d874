use super::{FileSystem, MethodInfo, SchemaError, flatten, method_path};
use base64::{Engine, prelude::BASE64_STANDARD};
use prost::Message;
use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A session's schema: a descriptor pool plus an index of every loaded method keyed by its
/// `/package.Service/Method` path.
///
/// Load calls merge into the existing store. Each call works on a copy of the pool that only
/// replaces the current one once everything validated, so a failed load leaves the store
/// exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    pool: DescriptorPool,
    methods: HashMap<String, MethodDescriptor>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a binary encoded `FileDescriptorSet`.
    pub fn load(&mut self, bytes: &[u8]) -> Result<Vec<MethodInfo>, SchemaError> {
        let fd_set = FileDescriptorSet::decode(bytes)?;
        self.load_file_descriptor_set(fd_set)
    }

    /// Loads a standard base64 encoded `FileDescriptorSet`.
    pub fn load_base64(&mut self, encoded: &str) -> Result<Vec<MethodInfo>, SchemaError> {
        let bytes = BASE64_STANDARD.decode(encoded.trim())?;
        self.load(&bytes)
    }

    /// Loads a protoset file (a binary `FileDescriptorSet`, as produced by
    /// `protoc --include_imports -o`) read through `fs`.
    pub fn load_protoset(
        &mut self,
        fs: &dyn FileSystem,
        path: impl AsRef<Path>,
    ) -> Result<Vec<MethodInfo>, SchemaError> {
        let path = path.as_ref();
        let bytes = fs.read(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.load(&bytes)
    }

    /// Compiles `.proto` sources and loads the result, imports included.
    ///
    /// # Arguments
    ///
    /// * `import_paths` - Directories searched for imports. When empty, the current working
    ///   directory is used.
    /// * `filenames` - The files to compile. They must live inside one of the import paths.
    pub fn load_files<P, F>(
        &mut self,
        import_paths: &[P],
        filenames: &[F],
    ) -> Result<Vec<MethodInfo>, SchemaError>
    where
        P: AsRef<Path>,
        F: AsRef<Path>,
    {
        let includes: Vec<PathBuf> = if import_paths.is_empty() {
            vec![std::env::current_dir().map_err(SchemaError::WorkingDirectory)?]
        } else {
            import_paths.iter().map(|p| p.as_ref().to_path_buf()).collect()
        };

        let mut compiler = protox::Compiler::new(includes)?;
        compiler.include_imports(true);
        compiler.open_files(filenames.iter().map(AsRef::as_ref))?;

        self.load_file_descriptor_set(compiler.file_descriptor_set())
    }

    /// Merges a decoded `FileDescriptorSet` into the store.
    ///
    /// Files already present are skipped when their definitions match and rejected with
    /// [`SchemaError::ConflictingFile`] when they don't.
    ///
    /// # Returns
    ///
    /// * `Ok(methods)` - Every method declared by the files in `fd_set` that is indexed under
    ///   its path. A path already indexed from another file keeps its first definition.
    /// * `Err(SchemaError)` - The set is incomplete or clashes with what is already loaded.
    pub fn load_file_descriptor_set(
        &mut self,
        fd_set: FileDescriptorSet,
    ) -> Result<Vec<MethodInfo>, SchemaError> {
        let mut pool = self.pool.clone();

        let flattened = flatten(fd_set.file, |name| pool.get_file_by_name(name).is_some())?;
        let names: Vec<String> = flattened.iter().map(|f| f.name().to_string()).collect();

        let mut fresh = Vec::with_capacity(flattened.len());
        for file in flattened {
            match pool.get_file_by_name(file.name()) {
                Some(existing) if same_definitions(existing.file_descriptor_proto(), &file) => {}
                Some(_) => return Err(SchemaError::ConflictingFile(file.name().to_string())),
                None => fresh.push(file),
            }
        }

        let added = fresh.len();
        if !fresh.is_empty() {
            pool.add_file_descriptor_set(FileDescriptorSet { file: fresh })?;
        }

        let mut methods = self.methods.clone();
        let mut infos = Vec::new();

        for file in names.iter().filter_map(|name| pool.get_file_by_name(name)) {
            for service in file.services() {
                for method in service.methods() {
                    match methods.entry(method_path(&method)) {
                        Entry::Vacant(slot) => {
                            infos.push(MethodInfo::from_descriptor(&method));
                            slot.insert(method);
                        }
                        Entry::Occupied(indexed)
                            if indexed.get().parent_service().parent_file().name()
                                == file.name() =>
                        {
                            infos.push(MethodInfo::from_descriptor(&method));
                        }
                        Entry::Occupied(indexed) => warn!(
                            method = %indexed.key(),
                            file = file.name(),
                            indexed_from = indexed.get().parent_service().parent_file().name(),
                            "Method is already loaded from another file, keeping it"
                        ),
                    }
                }
            }
        }

        debug!(
            files = names.len(),
            added,
            methods = infos.len(),
            "Loaded descriptors"
        );

        self.pool = pool;
        self.methods = methods;

        Ok(infos)
    }

    /// Looks up a method by path. The path must be in leading-slash form.
    pub fn method(&self, path: &str) -> Option<&MethodDescriptor> {
        self.methods.get(path)
    }

    /// Looks up a message type by its fully qualified name (e.g. `echo.EchoRequest`).
    pub fn message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }

    /// Every indexed method, sorted by path.
    pub fn methods(&self) -> Vec<MethodInfo> {
        let mut infos: Vec<MethodInfo> = self.methods.values().map(MethodInfo::from_descriptor).collect();
        infos.sort_by(|a, b| a.full_method.cmp(&b.full_method));
        infos
    }

    /// Fully qualified names of every loaded service, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect();
        services.sort();
        services
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// Source info and options may legitimately differ between two producers of the same file.
fn same_definitions(a: &FileDescriptorProto, b: &FileDescriptorProto) -> bool {
    a.package == b.package
        && a.dependency == b.dependency
        && a.message_type == b.message_type
        && a.enum_type == b.enum_type
        && a.service == b.service
        && a.extension == b.extension
}
