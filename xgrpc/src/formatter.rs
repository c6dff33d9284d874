use colored::*;
use xgrpc_core::{
    client::Response,
    descriptor::MethodInfo,
    prost_reflect::{EnumDescriptor, Kind, MessageDescriptor, MethodDescriptor, ServiceDescriptor},
};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

pub struct MethodList(pub Vec<MethodInfo>);

/// A call response including its status, headers and trailers.
pub struct VerboseResponse(pub Response);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<Response> for FormattedString {
    fn from(response: Response) -> Self {
        match (response.message, response.error) {
            (Some(message), _) => FormattedString::from(message),
            (None, Some(error)) => FormattedString(format!(
                "{} code={:?} message={:?}",
                "gRPC Failed:".red().bold(),
                response.status,
                error.message
            )),
            (None, None) => FormattedString(format!("{:?}", response.status)),
        }
    }
}

impl From<VerboseResponse> for FormattedString {
    fn from(VerboseResponse(response): VerboseResponse) -> Self {
        let value = serde_json::to_value(&response).unwrap_or_default();
        FormattedString::from(value)
    }
}

// Errors reach the user through anyhow, with the outermost context as headline.
impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain();
        let headline = chain.next().map(ToString::to_string).unwrap_or_default();
        let causes: Vec<String> = chain.map(|cause| format!("'{cause}'")).collect();

        if causes.is_empty() {
            FormattedString(format!("{}", headline.red().bold()))
        } else {
            FormattedString(format!("{}\n\n{}", headline.red().bold(), causes.join("\n")))
        }
    }
}

impl From<MethodList> for FormattedString {
    fn from(MethodList(methods): MethodList) -> Self {
        if methods.is_empty() {
            return FormattedString("No methods found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Available Methods:\n");
        for method in methods {
            let streaming = match (method.is_client_streaming, method.is_server_streaming) {
                (false, false) => "",
                (true, false) => " (client streaming)",
                (false, true) => " (server streaming)",
                (true, true) => " (bidirectional)",
            };
            out.push_str(&format!(
                "  - {}{}\n",
                method.full_method.trim_start_matches('/').green(),
                streaming.dimmed()
            ));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Available Services:\n");
        for svc in services {
            out.push_str(&format!("  - {}\n", svc.green()));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<ServiceDescriptor> for FormattedString {
    fn from(service: ServiceDescriptor) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "service".cyan(),
            service.name().green()
        ));

        for method in service.methods() {
            out.push_str("  ");
            // Reuse the From<MethodDescriptor> implementation
            let method_fmt = FormattedString::from(method);
            out.push_str(&method_fmt.0);
            out.push_str("\n\n");
        }
        out.push('}');
        FormattedString(out)
    }
}

impl From<MethodDescriptor> for FormattedString {
    fn from(method: MethodDescriptor) -> Self {
        let input_stream = if method.is_client_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };
        let output_stream = if method.is_server_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };

        FormattedString(format!(
            "{} {}({}{}) {} ({}{});",
            "rpc".cyan(),
            method.name().green(),
            input_stream,
            method.input().full_name().yellow(),
            "returns".cyan(),
            output_stream,
            method.output().full_name().yellow()
        ))
    }
}

impl From<MessageDescriptor> for FormattedString {
    fn from(message: MessageDescriptor) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "message".cyan(),
            message.name().green()
        ));

        for field in message.fields() {
            let label = if field.is_list() {
                format!("{} ", "repeated".cyan())
            } else {
                "".to_string()
            };

            let type_name = match field.kind() {
                Kind::Double => "double".yellow(),
                Kind::Float => "float".yellow(),
                Kind::Int32 => "int32".yellow(),
                Kind::Int64 => "int64".yellow(),
                Kind::Uint32 => "uint32".yellow(),
                Kind::Uint64 => "uint64".yellow(),
                Kind::Sint32 => "sint32".yellow(),
                Kind::Sint64 => "sint64".yellow(),
                Kind::Fixed32 => "fixed32".yellow(),
                Kind::Fixed64 => "fixed64".yellow(),
                Kind::Sfixed32 => "sfixed32".yellow(),
                Kind::Sfixed64 => "sfixed64".yellow(),
                Kind::Bool => "bool".yellow(),
                Kind::String => "string".yellow(),
                Kind::Bytes => "bytes".yellow(),
                Kind::Message(m) => m.full_name().yellow(),
                Kind::Enum(e) => e.full_name().yellow(),
            };

            if field.is_map() {
                out.push_str(&format!(
                    "  // map entry: {} {} = {};\n",
                    type_name,
                    field.name(),
                    field.number()
                ));
            } else {
                out.push_str(&format!(
                    "  {}{}{} {} = {};\n",
                    label,
                    type_name,
                    " ".normal(), // Reset color
                    field.name(),
                    field.number()
                ));
            }
        }
        out.push('}');
        FormattedString(out)
    }
}

impl From<EnumDescriptor> for FormattedString {
    fn from(enum_desc: EnumDescriptor) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "enum".cyan(),
            enum_desc.name().green()
        ));

        for val in enum_desc.values() {
            out.push_str(&format!(
                "  {} = {};\n",
                val.name(),
                val.number().to_string().purple()
            ));
        }
        out.push('}');

        FormattedString(out)
    }
}
