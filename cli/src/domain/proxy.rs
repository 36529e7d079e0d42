//! Proxy (nginx) document rendering and parsing.
//!
//! Documents are opaque text to the rest of the system; the proxy's own
//! config test is the only validator that matters.

use std::fmt::Write as _;

use regex::Regex;

use crate::domain::config::{ProxyTuning, TlsConfig};

/// Inputs for a container site + upstream pair.
#[derive(Debug, Clone)]
pub struct ContainerSite<'a> {
    pub domain: &'a str,
    pub backend: &'a str,
    /// `host:port` the upstream points at.
    pub upstream_target: &'a str,
    pub tls: Option<&'a TlsConfig>,
    pub tuning: &'a ProxyTuning,
}

/// Inputs for a static site document.
#[derive(Debug, Clone)]
pub struct StaticSite<'a> {
    pub domain: &'a str,
    /// Path of the `current` pointer; nginx resolves it per request.
    pub root: &'a str,
    pub spa: bool,
    pub tls: Option<&'a TlsConfig>,
    pub tuning: &'a ProxyTuning,
}

/// Render the `upstream` block for a container backend.
#[must_use]
pub fn render_upstream(backend: &str, upstream_target: &str) -> String {
    format!(
        "# managed by tandem\n\
         upstream {backend} {{\n    \
             server {upstream_target} max_fails=3 fail_timeout=10s;\n    \
             keepalive 32;\n\
         }}\n"
    )
}

/// Render the site document proxying to `site.backend`.
#[must_use]
pub fn render_container_site(site: &ContainerSite<'_>) -> String {
    let mut body = String::new();
    let t = site.tuning;
    let _ = writeln!(body, "    client_max_body_size {};", t.client_max_body_size);
    body.push_str("\n    location / {\n");
    let _ = writeln!(body, "        proxy_pass http://{};", site.backend);
    body.push_str(
        "        proxy_http_version 1.1;\n\
         \x20       proxy_set_header Connection \"\";\n\
         \x20       proxy_set_header Host $host;\n\
         \x20       proxy_set_header X-Real-IP $remote_addr;\n\
         \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
         \x20       proxy_set_header X-Forwarded-Proto $scheme;\n",
    );
    let _ = writeln!(body, "        proxy_connect_timeout {}s;", t.connect_timeout_secs);
    let _ = writeln!(body, "        proxy_read_timeout {}s;", t.read_timeout_secs);
    body.push_str("    }\n");
    wrap_server(site.domain, site.tls, &t.custom_directives, &body)
}

/// Render the site document serving files from `site.root`.
#[must_use]
pub fn render_static_site(site: &StaticSite<'_>) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "    root {};", site.root);
    body.push_str("    index index.html;\n");
    let _ = writeln!(
        body,
        "    client_max_body_size {};",
        site.tuning.client_max_body_size
    );
    let fallback = if site.spa { "/index.html" } else { "=404" };
    let _ = write!(
        body,
        "\n    location / {{\n        try_files $uri $uri/ {fallback};\n    }}\n"
    );
    wrap_server(site.domain, site.tls, &site.tuning.custom_directives, &body)
}

fn wrap_server(domain: &str, tls: Option<&TlsConfig>, custom: &[String], body: &str) -> String {
    let mut doc = String::from("# managed by tandem\n");
    match tls {
        Some(tls) => {
            let _ = write!(
                doc,
                "server {{\n    listen 80;\n    listen [::]:80;\n    server_name {domain};\n    \
                 return 301 https://$host$request_uri;\n}}\n\n\
                 server {{\n    listen 443 ssl;\n    listen [::]:443 ssl;\n    http2 on;\n    \
                 server_name {domain};\n    ssl_certificate {};\n    ssl_certificate_key {};\n",
                tls.certificate, tls.certificate_key
            );
        }
        None => {
            let _ = write!(
                doc,
                "server {{\n    listen 80;\n    listen [::]:80;\n    server_name {domain};\n"
            );
        }
    }
    doc.push_str(body);
    for directive in custom {
        let directive = directive.trim();
        if directive.is_empty() {
            continue;
        }
        let _ = writeln!(doc, "    {directive}");
    }
    doc.push_str("}\n");
    doc
}

/// Extract the port the upstream document currently routes to.
///
/// Returns `None` for a missing/foreign document, which the orchestrator
/// treats as "no prior deployment".
#[must_use]
pub fn published_port(upstream_doc: &str) -> Option<u16> {
    let re = Regex::new(r"(?m)^\s*server\s+[^\s;:]+:(\d+)").ok()?;
    re.captures(upstream_doc)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
