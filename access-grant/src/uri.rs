//! Resource hierarchy helpers
//!
//! Solid storage is a tree of containers whose URIs end in `/`. These helpers
//! walk that tree and decide containment between a held scope and a request
//! target.

use url::Url;

use crate::{ACCESS_GRANT_TYPE, ACCESS_REQUEST_TYPE, SOLID_VC_NAMESPACE};

/// Check whether an HTTP status code is in the 2xx range
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Compute the container holding `uri`.
///
/// Returns `None` for a storage root (`https://host/` or `https://host`).
/// Query and fragment are dropped and the result always ends with `/`.
pub fn get_parent(uri: &Url) -> Option<Url> {
    let path = uri.path();
    if path.is_empty() || path == "/" {
        return None;
    }

    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;

    let mut parent = uri.clone();
    parent.set_path(&trimmed[..=idx]);
    parent.set_query(None);
    parent.set_fragment(None);
    Some(parent)
}

/// Check whether `parent` covers `resource` in the container hierarchy.
///
/// The relation is reflexive. Both URIs must share scheme, host and port. A
/// parent path that does not end with `/` names a leaf resource and therefore
/// only covers itself.
pub fn is_ancestor(parent: &Url, resource: &Url) -> bool {
    if parent.scheme() != resource.scheme()
        || parent.host_str() != resource.host_str()
        || parent.port_or_known_default() != resource.port_or_known_default()
    {
        return false;
    }

    let parent_path = normalized_path(parent);
    let resource_path = normalized_path(resource);

    if parent_path == resource_path {
        return true;
    }

    parent_path.ends_with('/') && resource_path.starts_with(parent_path)
}

fn normalized_path(uri: &Url) -> &str {
    match uri.path() {
        "" => "/",
        path => path,
    }
}

/// Check whether a credential type names an Access Grant
pub fn is_access_grant(type_name: &str) -> bool {
    matches_type(type_name, ACCESS_GRANT_TYPE)
}

/// Check whether a credential type names an Access Request
pub fn is_access_request(type_name: &str) -> bool {
    matches_type(type_name, ACCESS_REQUEST_TYPE)
}

/// Compare a (possibly namespace-qualified) type against a local name
pub(crate) fn matches_type(type_name: &str, local_name: &str) -> bool {
    type_name == local_name
        || type_name
            .strip_prefix(SOLID_VC_NAMESPACE)
            .is_some_and(|rest| rest == local_name)
}

/// Drop the fragment so that `#it` style anchors share a cache slot
pub(crate) fn without_fragment(uri: &Url) -> Url {
    let mut normalized = uri.clone();
    normalized.set_fragment(None);
    normalized
}
