// NetSleuth - app/profile_mgr.rs
//
// Loads platform profiles from the built-in set (embedded in the binary)
// and from user-defined TOML files on disk.
// User profiles override built-in profiles with the same id.

use crate::core::profile::{self, PlatformProfile};
use crate::platform::fs::read_limited;
use crate::util::constants;
use crate::util::error::ProfileError;
use std::path::{Path, PathBuf};

/// Load all available profiles: built-in first, then user-defined overrides.
///
/// Invalid profiles are logged and skipped (non-fatal).
/// Returns the merged list and any non-fatal errors encountered.
pub fn load_all_profiles(
    user_profile_dir: Option<&Path>,
) -> (Vec<PlatformProfile>, Vec<ProfileError>) {
    let mut profiles = profile::load_builtin_profiles();
    let mut errors = Vec::new();

    tracing::info!(builtin_count = profiles.len(), "Loaded built-in platform profiles");

    if let Some(dir) = user_profile_dir {
        if dir.is_dir() {
            let (user_profiles, user_errors) = load_user_profiles(dir);
            errors.extend(user_errors);

            for user_profile in user_profiles {
                if let Some(pos) = profiles.iter().position(|p| p.id == user_profile.id) {
                    tracing::info!(
                        profile_id = %user_profile.id,
                        "User profile overrides built-in"
                    );
                    profiles[pos] = user_profile;
                } else {
                    tracing::info!(profile_id = %user_profile.id, "Loaded user-defined profile");
                    profiles.push(user_profile);
                }
            }
        } else {
            tracing::debug!(
                dir = %dir.display(),
                "User platform directory does not exist (skipping)"
            );
        }
    }

    if profiles.len() > constants::MAX_PROFILES {
        tracing::warn!(
            count = profiles.len(),
            max = constants::MAX_PROFILES,
            "Too many profiles loaded, truncating"
        );
        errors.push(ProfileError::TooManyProfiles {
            count: profiles.len(),
            max: constants::MAX_PROFILES,
        });
        profiles.truncate(constants::MAX_PROFILES);
    }

    for e in &errors {
        tracing::warn!(error = %e, "Platform profile skipped");
    }
    tracing::info!(total = profiles.len(), "Profile loading complete");

    (profiles, errors)
}

/// Load user-defined profiles from a directory, in file-name order.
///
/// Two files declaring the same id are an error for the second file; the
/// first one is kept.
fn load_user_profiles(dir: &Path) -> (Vec<PlatformProfile>, Vec<ProfileError>) {
    let mut profiles: Vec<(PlatformProfile, PathBuf)> = Vec::new();
    let mut errors = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(ProfileError::Io {
                path: dir.to_path_buf(),
                source: e,
            });
            return (Vec::new(), errors);
        }
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry_result in entries {
        match entry_result {
            Ok(entry) => {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    paths.push(path);
                }
            }
            Err(e) => errors.push(ProfileError::Io {
                path: dir.to_path_buf(),
                source: e,
            }),
        }
    }
    paths.sort();

    for path in paths {
        let content = match read_limited(&path, constants::MAX_PROFILE_FILE_SIZE) {
            Ok(Ok(c)) => c,
            Ok(Err(size)) => {
                errors.push(ProfileError::FileTooLarge {
                    path,
                    size,
                    max_size: constants::MAX_PROFILE_FILE_SIZE,
                });
                continue;
            }
            Err(e) => {
                errors.push(ProfileError::Io { path, source: e });
                continue;
            }
        };

        match profile::parse_profile_toml(&content, &path)
            .and_then(|def| profile::validate_and_compile(def, &path, false))
        {
            Ok(p) => {
                if let Some((_, first)) = profiles.iter().find(|(q, _)| q.id == p.id) {
                    errors.push(ProfileError::DuplicateId {
                        id: p.id,
                        path1: first.clone(),
                        path2: path,
                    });
                } else {
                    profiles.push((p, path));
                }
            }
            Err(e) => errors.push(e),
        }
    }

    (profiles.into_iter().map(|(p, _)| p).collect(), errors)
}
