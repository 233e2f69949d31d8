//! UserDirectory: cached answers to "is this user a teacher?" and "may their
//! screen be captured?".
//!
//! Agents report the logged-in user as a free-form string.  Depending on the
//! agent that is `jdoe`, `jdoe (John Doe)` or `SCHOOL\jdoe`.  The directory
//! extracts the login name, resolves the account once and keeps the answer
//! for the lifetime of the process.
//!
//! # Cache rules
//!
//! - Entries are keyed by the raw lookup string, so `jdoe` and
//!   `jdoe (John Doe)` are cached separately even though they resolve the same
//!   account.
//! - An entry is never modified after insertion.  Group or role changes in the
//!   directory are picked up after a restart.
//! - A user that does not exist (or is not unique) is cached as an "unknown"
//!   entry that is neither teacher nor hidden.  A backend failure also answers
//!   "unknown" but is not cached, so the next lookup asks again.

use std::sync::Arc;

use classroom_core::UserAccount;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::infrastructure::directory::{DirectoryError, DirectoryLookup};
use crate::infrastructure::storage::config::ScreenshotConfig;

/// Which accounts must not have their screen captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotPolicy {
    hidden_groups: Vec<String>,
    hide_for_teachers: bool,
}

impl ScreenshotPolicy {
    /// Group names are compared case-insensitively.
    pub fn new<I, S>(hidden_groups: I, hide_for_teachers: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hidden_groups: hidden_groups
                .into_iter()
                .map(|g| g.as_ref().trim().to_lowercase())
                .filter(|g| !g.is_empty())
                .collect(),
            hide_for_teachers,
        }
    }

    pub fn from_config(config: &ScreenshotConfig) -> Self {
        Self::new(&config.hide_for_groups, config.hide_for_teachers)
    }

    /// Returns `true` if screenshots of `account` must be hidden.
    pub fn hides(&self, account: &UserAccount) -> bool {
        let in_hidden_group = account
            .group_names()
            .any(|group| self.hidden_groups.contains(&group));
        in_hidden_group || (self.hide_for_teachers && account.is_teacher)
    }
}

impl Default for ScreenshotPolicy {
    fn default() -> Self {
        Self::from_config(&ScreenshotConfig::default())
    }
}

/// Cached facts about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntry {
    /// Directory id of the account; `None` for an unknown user.
    pub account_id: Option<String>,
    pub username: String,
    pub is_teacher: bool,
    pub hide_screenshot: bool,
}

impl UserEntry {
    fn unknown(username: &str) -> Self {
        Self {
            account_id: None,
            username: username.to_string(),
            is_teacher: false,
            hide_screenshot: false,
        }
    }

    /// `false` for the placeholder returned for unresolvable users.
    pub fn is_known(&self) -> bool {
        self.account_id.is_some()
    }
}

/// Extracts the login name from an agent's user string.
///
/// Accepts `name`, `name (Display Name)` and `DOMAIN\name`.
///
/// # Errors
///
/// [`DirectoryError::MissingKey`] if no name is left after stripping.
pub fn parse_username(lookup: &str) -> Result<&str, DirectoryError> {
    let mut name = lookup.trim();
    if let Some(open) = name.find('(') {
        name = name[..open].trim_end();
    }
    if let Some(slash) = name.rfind('\\') {
        name = &name[slash + 1..];
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(DirectoryError::MissingKey(lookup.to_string()));
    }
    Ok(name)
}

/// Shared, insert-only user cache in front of a [`DirectoryLookup`].
pub struct UserDirectory {
    directory: Arc<dyn DirectoryLookup>,
    policy: ScreenshotPolicy,
    cache: DashMap<String, Arc<UserEntry>>,
}

impl UserDirectory {
    pub fn new(directory: Arc<dyn DirectoryLookup>, policy: ScreenshotPolicy) -> Self {
        Self {
            directory,
            policy,
            cache: DashMap::new(),
        }
    }

    /// Looks up the user behind `lookup`, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Only [`DirectoryError::MissingKey`]: every other failure is answered
    /// with an unknown entry.
    pub async fn get(&self, lookup: &str) -> Result<Arc<UserEntry>, DirectoryError> {
        let hit = self.cache.get(lookup).map(|entry| Arc::clone(entry.value()));
        if let Some(hit) = hit {
            return Ok(hit);
        }

        let username = parse_username(lookup)?;
        let entry = match self.directory.resolve_user_by_name(username).await {
            Ok(account) => {
                let hide_screenshot = self.policy.hides(&account);
                debug!(
                    "user {username}: teacher={} hide_screenshot={hide_screenshot}",
                    account.is_teacher
                );
                UserEntry {
                    account_id: Some(account.id),
                    username: username.to_string(),
                    is_teacher: account.is_teacher,
                    hide_screenshot,
                }
            }
            Err(DirectoryError::Backend(reason)) => {
                warn!("user {username}: directory unavailable ({reason}), not caching");
                return Ok(Arc::new(UserEntry::unknown(username)));
            }
            Err(e) => {
                info!("unknown user {username:?}: {e}");
                UserEntry::unknown(username)
            }
        };

        // A concurrent lookup may have inserted first; keep whichever landed.
        let stored = self
            .cache
            .entry(lookup.to_string())
            .or_insert_with(|| Arc::new(entry));
        Ok(Arc::clone(stored.value()))
    }

    /// The cached entry for `lookup`, without resolving it.
    pub fn cached(&self, lookup: &str) -> Option<Arc<UserEntry>> {
        self.cache.get(lookup).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of cached lookup strings.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDirectory")
            .field("policy", &self.policy)
            .field("cached", &self.cache.len())
            .finish()
    }
}
