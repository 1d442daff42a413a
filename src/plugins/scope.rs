//! Scope resolution: which room a path belongs to and which scopes it inherits.

use crate::core::config::{InheritanceConfig, ScopeConfig};
use crate::core::model::Scope;
use serde::{Deserialize, Serialize};

pub const WEIGHT_FILE: f64 = 1.0;
pub const WEIGHT_ROOM: f64 = 0.75;
pub const WEIGHT_PALACE: f64 = 0.5;
pub const WEIGHT_CORRIDOR: f64 = 0.25;

/// One level of the inheritance chain, narrowest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeLevel {
    pub scope: Scope,
    pub scope_path: String,
    pub weight: f64,
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_start_matches("./").replace('\\', "/")
}

/// Room a file path belongs to.
///
/// First configured room with an entry point that prefixes (or occurs in) the
/// path; else the path's first directory when directory derivation is on; else
/// the configured default room; else empty.
pub fn resolve_room(path: &str, config: &ScopeConfig) -> String {
    let path = normalize_path(path);

    for room in &config.rooms {
        let matched = room.entry_points.iter().any(|ep| {
            let ep = normalize_path(ep);
            !ep.is_empty() && (path.starts_with(&ep) || path.contains(&ep))
        });
        if matched {
            return room.name.clone();
        }
    }

    if config.derive_room_from_directory
        && let Some((dir, _)) = path.split_once('/')
        && !dir.is_empty()
    {
        return dir.to_string();
    }

    config.default_room.clone().unwrap_or_default()
}

/// Inheritance chain for a file path: file, room, palace, corridor.
///
/// The room level is skipped when room inheritance is off or no room resolves.
pub fn inheritance_chain(
    path: &str,
    scope: &ScopeConfig,
    inheritance: &InheritanceConfig,
) -> Vec<ScopeLevel> {
    let file = normalize_path(path);
    let mut chain = Vec::with_capacity(4);

    if !file.is_empty() {
        chain.push(ScopeLevel {
            scope: Scope::File,
            scope_path: file.clone(),
            weight: WEIGHT_FILE,
        });
    }
    if inheritance.room {
        let room = resolve_room(&file, scope);
        if !room.is_empty() {
            chain.push(ScopeLevel {
                scope: Scope::Room,
                scope_path: room,
                weight: WEIGHT_ROOM,
            });
        }
    }
    if inheritance.palace {
        chain.push(ScopeLevel {
            scope: Scope::Palace,
            scope_path: String::new(),
            weight: WEIGHT_PALACE,
        });
    }
    if inheritance.corridor {
        chain.push(ScopeLevel {
            scope: Scope::Corridor,
            scope_path: String::new(),
            weight: WEIGHT_CORRIDOR,
        });
    }
    chain
}
