//! Public URL resolution for a provisioned workspace.
//!
//! Candidates, first match wins:
//! 1. routing object host + its path prefix, with the configured scheme
//! 2. ingress host + workspace path, with the ingress scheme
//! 3. static public base URL + workspace path
//! 4. the bare workspace path

use crate::cluster::{IngressStatus, VirtualServiceStatus};
use crate::naming::IdeKind;

/// Everything provisioning learned that bears on the URL.
#[derive(Debug, Clone)]
pub struct RouteInputs<'a> {
    pub virtual_service: Option<&'a VirtualServiceStatus>,
    pub ingress: Option<&'a IngressStatus>,
    /// Workspace path (`/{ide}/{user}/{inst}`).
    pub path: &'a str,
    pub ide: IdeKind,
}

#[derive(Debug, Clone)]
pub struct UrlResolver {
    scheme: String,
    public_base_url: Option<String>,
}

impl UrlResolver {
    pub fn new(scheme: impl Into<String>, public_base_url: Option<String>) -> Self {
        Self {
            scheme: scheme.into(),
            public_base_url: public_base_url.filter(|base| !base.trim().is_empty()),
        }
    }

    pub fn resolve(&self, inputs: &RouteInputs<'_>) -> String {
        let url = self.candidate(inputs);
        if inputs.ide.is_code_editor() && !url.ends_with('/') {
            format!("{url}/")
        } else {
            url
        }
    }

    fn candidate(&self, inputs: &RouteInputs<'_>) -> String {
        if let Some(vs) = inputs.virtual_service {
            if !vs.host.is_empty() && !vs.path_prefix.is_empty() {
                return format!("{}://{}{}", self.scheme, vs.host, normalize(&vs.path_prefix));
            }
        }

        if let Some(ingress) = inputs.ingress {
            if let Some(host) = ingress.host.as_deref().filter(|h| !h.is_empty()) {
                let scheme = if ingress.scheme.is_empty() {
                    self.scheme.as_str()
                } else {
                    ingress.scheme.as_str()
                };
                return format!("{}://{}{}", scheme, host, normalize(inputs.path));
            }
        }

        if let Some(base) = &self.public_base_url {
            return format!("{}{}", base.trim_end_matches('/'), normalize(inputs.path));
        }

        normalize(inputs.path)
    }
}

/// Exactly one leading `/`.
pub fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}
