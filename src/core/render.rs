//! Renders the server-block template.

use crate::core::{artifact::RenderParams, schema};
use crate::error::ValidationError;

/// Renders the canonical server block for `params`.
///
/// Rendering is pure: equal parameters always produce byte-identical output, which is what lets
/// the planner detect drift by comparing strings. Values are substituted verbatim; quoting them
/// for the remote shell is the command layer's job.
///
/// ```
/// # use vhostctl::core::{render, RenderParams};
/// let content = render(&RenderParams {
///     server_name: "blog.example.com".into(),
///     listen_port: 8080,
///     document_root: "/var/www/blog".into(),
/// })
/// .unwrap();
///
/// assert!(content.contains("    listen 8080;\n"));
/// assert!(content.ends_with("}\n"));
/// ```
pub fn render(params: &RenderParams) -> Result<String, ValidationError> {
    schema::validate_params(params)?;

    let RenderParams {
        server_name,
        listen_port,
        document_root,
    } = params;

    Ok(format!(
        "server {{
    listen {listen_port};
    server_name {server_name};

    root {document_root};
    index index.html;

    location / {{
        try_files $uri $uri/ =404;
    }}
}}
"
    ))
}
