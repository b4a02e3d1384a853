//! Linux capability management for the nested container.
//!
//! The nested container is granted every capability the running kernel
//! supports; inside the child, anything outside the configured set is
//! removed from the bounding set before exec.

use std::collections::HashSet;
use std::str::FromStr;

use caps::{CapSet, Capability};
use sharemnt_common::error::{Result, ShareMntError};

/// Returns the `CAP_*` names of every capability the kernel supports,
/// sorted by name.
#[must_use]
pub fn all_supported() -> Vec<String> {
    let mut names = caps::runtime::thread_all_supported()
        .into_iter()
        .map(|cap| cap.to_string())
        .collect::<Vec<_>>();
    names.sort();
    names
}

/// Parses `CAP_*` names into capabilities.
///
/// # Errors
///
/// Returns [`ShareMntError::Capability`] for an unknown name.
pub fn parse_names(names: &[String]) -> Result<HashSet<Capability>> {
    names
        .iter()
        .map(|name| {
            Capability::from_str(name).map_err(|e| ShareMntError::Capability {
                message: format!("unknown capability {name:?}: {e}"),
            })
        })
        .collect()
}

/// Drops every bounding capability not named in `keep`.
///
/// # Errors
///
/// Returns an error if a name is unknown or the bounding set cannot be
/// read or changed.
pub fn restrict_bounding(keep: &[String]) -> Result<()> {
    let keep = parse_names(keep)?;
    let mut dropped = 0usize;
    for cap in caps::runtime::thread_all_supported().difference(&keep) {
        let present = caps::has_cap(None, CapSet::Bounding, *cap).map_err(|e| {
            ShareMntError::Capability {
                message: format!("read bounding {cap}: {e}"),
            }
        })?;
        if !present {
            continue;
        }
        caps::drop(None, CapSet::Bounding, *cap).map_err(|e| ShareMntError::Capability {
            message: format!("drop {cap}: {e}"),
        })?;
        dropped += 1;
    }
    tracing::debug!(retained = keep.len(), dropped, "bounding set restricted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_supported_names_are_cap_prefixed_and_parseable() {
        let names = all_supported();
        assert!(names.iter().all(|n| n.starts_with("CAP_")));
        assert_eq!(parse_names(&names).unwrap().len(), names.len());
    }

    #[test]
    fn all_supported_includes_basic_capabilities() {
        let names = all_supported();
        assert!(names.iter().any(|n| n == "CAP_CHOWN"));
        assert!(names.iter().any(|n| n == "CAP_SYS_ADMIN"));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let names = vec!["CAP_CHOWN".to_string(), "CAP_TIME_TRAVEL".to_string()];
        assert!(matches!(
            parse_names(&names),
            Err(ShareMntError::Capability { .. })
        ));
    }
}
