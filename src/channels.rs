use crate::{enums::ChannelRole, registry::FileRegistry};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub type ChannelMap = BTreeMap<ChannelRole, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelGroupError {
    #[error("A channel group needs at least one channel")]
    EmptyGroup,

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Missing required channel: {0}")]
    MissingChannel(ChannelRole),

    #[error("File {file_id} for channel {role} not found")]
    UnknownFile { role: ChannelRole, file_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelGroup {
    pub group_id: String,
    pub channels: ChannelMap,
    pub channel_count: usize,
}

/// Groups independently uploaded MRI sequences of one scan session.
///
/// A group is only admitted when all four roles are present and every file
/// they reference is known to the [`FileRegistry`]. Groups are immutable
/// once stored. Deleting a referenced file later leaves the group in place.
pub struct ChannelGroupRegistry {
    files: Arc<FileRegistry>,
    groups: RwLock<IndexMap<String, ChannelMap>>,
}

impl ChannelGroupRegistry {
    pub fn new(files: Arc<FileRegistry>) -> Self {
        Self {
            files,
            groups: RwLock::new(IndexMap::new()),
        }
    }

    /// Validate `channels` and store them under a fresh group identifier.
    ///
    /// Nothing is stored unless every check passes.
    pub fn create(&self, channels: &HashMap<String, String>) -> Result<String, ChannelGroupError> {
        let channels = Self::validate(channels)?;
        for (&role, file_id) in &channels {
            if !self.files.contains(file_id) {
                return Err(ChannelGroupError::UnknownFile {
                    role,
                    file_id: file_id.clone(),
                });
            }
        }

        let group_id = Uuid::new_v4().to_string();
        info!(%group_id, channels = channels.len(), "channel group created");
        self.groups.write().insert(group_id.clone(), channels);
        Ok(group_id)
    }

    fn validate(channels: &HashMap<String, String>) -> Result<ChannelMap, ChannelGroupError> {
        if channels.is_empty() {
            return Err(ChannelGroupError::EmptyGroup);
        }

        let mut parsed = ChannelMap::new();
        for (name, file_id) in channels {
            let role = ChannelRole::from_str(name)
                .map_err(|()| ChannelGroupError::UnknownChannel(name.clone()))?;
            parsed.insert(role, file_id.clone());
        }

        match ChannelRole::REQUIRED.into_iter().find(|role| !parsed.contains_key(role)) {
            Some(missing) => Err(ChannelGroupError::MissingChannel(missing)),
            None => Ok(parsed),
        }
    }

    pub fn get(&self, group_id: &str) -> Option<ChannelMap> {
        self.groups.read().get(group_id).cloned()
    }

    pub fn list(&self) -> Vec<ChannelGroup> {
        self.groups
            .read()
            .iter()
            .map(|(group_id, channels)| ChannelGroup {
                group_id: group_id.clone(),
                channels: channels.clone(),
                channel_count: channels.len(),
            })
            .collect()
    }

    pub fn delete(&self, group_id: &str) -> bool {
        let removed = self.groups.write().shift_remove(group_id).is_some();
        if removed {
            info!(group_id, "channel group deleted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}
