//! Cross-package and cross-record resolution passes.
//!
//! Package pruning runs before any task starts; the record passes run on
//! the merged record list after every task has finished.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::harvest::log::LogLevel;
use crate::harvest::traits::PackageKind;
use crate::harvest::Package;
use crate::model::{App, AppKind};

// ============================================================================
// Package Pruning
// ============================================================================

/// Disables 32-bit packages that have an enabled 64-bit build of the same
/// name. Arch-independent packages are never disabled. Returns the number
/// of packages disabled.
pub fn prune_multiarch(packages: &mut [Package]) -> usize {
    let names_64bit: HashSet<String> = packages
        .iter()
        .filter(|p| p.enabled() && p.is_64bit())
        .map(|p| p.name().to_string())
        .collect();

    let mut disabled = 0;
    for package in packages.iter_mut() {
        if !package.enabled() || package.is_64bit() || package.is_any_arch() {
            continue;
        }
        if names_64bit.contains(package.name()) {
            package.log(
                LogLevel::Debug,
                &format!("{} is not 64 bit, disabling", package.nevra()),
            );
            debug!(package = %package.nevra(), "Disabled by multi-arch pruning");
            package.set_enabled(false);
            disabled += 1;
        }
    }
    disabled
}

/// Keeps only the newest enabled package of each name. Firmware is exempt
/// and keeps every version. Returns the number of packages disabled.
pub fn prune_versions(packages: &mut [Package]) -> usize {
    let mut newest: HashMap<String, usize> = HashMap::new();
    let mut losers = Vec::new();

    for (index, package) in packages.iter().enumerate() {
        if !package.enabled() || package.kind() == PackageKind::Firmware {
            continue;
        }
        match newest.get(package.name()).copied() {
            Some(current) => {
                if package.compare(&packages[current]) == Ordering::Greater {
                    losers.push(current);
                    newest.insert(package.name().to_string(), index);
                } else {
                    losers.push(index);
                }
            }
            None => {
                newest.insert(package.name().to_string(), index);
            }
        }
    }

    for &index in &losers {
        let package = &mut packages[index];
        package.log(
            LogLevel::Debug,
            &format!("{} is not the newest version, disabling", package.nevra()),
        );
        debug!(package = %package.nevra(), "Disabled by version pruning");
        package.set_enabled(false);
    }
    losers.len()
}

// ============================================================================
// Record Passes
// ============================================================================

/// Vetoes non-vetoed records lacking a name, a summary, or (for kinds that
/// need one) an icon.
pub fn detect_missing_info(apps: &mut [App]) {
    for app in apps.iter_mut().filter(|a| !a.is_vetoed()) {
        if app.name().is_none() {
            app.add_veto("Has no Name");
        }
        if app.summary().is_none() {
            app.add_veto("Has no Summary");
        }
        if app.kind.requires_icon() && app.icons.is_empty() {
            app.add_veto("Has no Icon");
        }
    }
}

/// Vetoes addons whose first `extends` target is not a desktop application
/// produced from a package in this build.
pub fn detect_missing_parents(apps: &mut [App]) {
    let parents: HashSet<String> = apps
        .iter()
        .filter(|a| a.kind == AppKind::Desktop && a.pkgname_default().is_some())
        .map(|a| a.id.clone())
        .collect();

    for app in apps.iter_mut() {
        if app.kind != AppKind::Addon || app.pkgname_default().is_none() {
            continue;
        }
        let Some(target) = app.extends.first().cloned() else {
            continue;
        };
        if parents.contains(&target) {
            continue;
        }
        warn!(app = %app.id, parent = %target, "Addon has no parent");
        let reason = format!("{} has no parent of '{}'", app.id, target);
        app.add_veto(reason);
    }
}

/// Warns about non-vetoed records sharing a default package name. Returns
/// the warnings.
pub fn detect_pkgname_dups(apps: &[App]) -> Vec<String> {
    let mut seen: HashMap<&str, &App> = HashMap::new();
    let mut warnings = Vec::new();
    for app in apps.iter().filter(|a| !a.is_vetoed()) {
        let Some(pkgname) = app.pkgname_default() else {
            continue;
        };
        match seen.get(pkgname) {
            Some(found) => {
                let message = format!(
                    "{} and {} share the package '{}'",
                    app.id, found.id, pkgname
                );
                warn!("{}", message);
                warnings.push(message);
            }
            None => {
                seen.insert(pkgname, app);
            }
        }
    }
    warnings
}

// ============================================================================
// Tests
// ============================================================================
