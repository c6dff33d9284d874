use super::SchemaError;
use prost_types::FileDescriptorProto;
use std::collections::{HashMap, HashSet};

/// Flattens the import graph of `files` into a list where every dependency comes before the
/// files importing it.
///
/// The graph is walked depth-first from each file in input order and every file is visited at
/// most once, keyed by name, so diamond imports (`a -> b -> d`, `a -> c -> d`) yield `d` once.
/// An import that is neither part of `files` nor accepted by `is_known` is reported as
/// [`SchemaError::UnresolvedImport`].
pub fn flatten<F>(
    files: Vec<FileDescriptorProto>,
    is_known: F,
) -> Result<Vec<FileDescriptorProto>, SchemaError>
where
    F: Fn(&str) -> bool,
{
    let roots: Vec<String> = files.iter().map(|f| f.name().to_string()).collect();

    let mut pending = HashMap::with_capacity(files.len());
    for file in files {
        pending.entry(file.name().to_string()).or_insert(file);
    }

    let mut walk = Walk {
        pending,
        seen: HashSet::new(),
        flattened: Vec::with_capacity(roots.len()),
        is_known,
    };

    for root in &roots {
        walk.visit(root)?;
    }

    Ok(walk.flattened)
}

struct Walk<F> {
    pending: HashMap<String, FileDescriptorProto>,
    seen: HashSet<String>,
    flattened: Vec<FileDescriptorProto>,
    is_known: F,
}

impl<F> Walk<F>
where
    F: Fn(&str) -> bool,
{
    fn visit(&mut self, name: &str) -> Result<(), SchemaError> {
        if !self.seen.insert(name.to_string()) {
            return Ok(());
        }

        let Some(file) = self.pending.remove(name) else {
            return Ok(());
        };

        for import in &file.dependency {
            if self.seen.contains(import) {
                continue;
            }

            if self.pending.contains_key(import) {
                self.visit(import)?;
            } else if !(self.is_known)(import) {
                return Err(SchemaError::UnresolvedImport {
                    file: name.to_string(),
                    import: import.clone(),
                });
            }
        }

        self.flattened.push(file);
        Ok(())
    }
}
