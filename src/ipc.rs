//! Rendezvous identifiers shared with the screen-recording extension
//!
//! The host process and the extension process locate each other only
//! through these values, so both must be built from this single definition.

use std::path::{Path, PathBuf};

use crate::config::CaptureConfig;

/// File name of the socket the extension writes frames to, inside the
/// application-group container.
pub const SCREENSHARING_SOCKET_NAME: &str = "rtc_SSFD";

/// Configuration key under which the application-group identifier is stored.
pub const APP_GROUP_IDENTIFIER_KEY: &str = "RTCAppGroupIdentifier";

/// Location of the shared channel for one capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureChannel {
    /// Application-group identifier both processes are entitled to
    pub app_group_id: String,
    /// Full path of the socket file
    pub socket_path: PathBuf,
}

impl CaptureChannel {
    /// Resolve the shared channel from configuration.
    ///
    /// Returns `None` when no application group is configured, in which case
    /// capture cannot be started at all.
    pub fn resolve(config: &CaptureConfig) -> Option<Self> {
        let app_group_id = config
            .app_group_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;

        let container = group_container_dir(config.group_container_root.as_deref(), app_group_id);

        Some(Self {
            app_group_id: app_group_id.to_string(),
            socket_path: container.join(SCREENSHARING_SOCKET_NAME),
        })
    }
}

/// Directory shared by all processes of an application group
fn group_container_dir(root: Option<&Path>, app_group_id: &str) -> PathBuf {
    match root {
        Some(root) => root.join(app_group_id),
        None => std::env::temp_dir().join("rtc-bridge-groups").join(app_group_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_requires_app_group() {
        let config = CaptureConfig::default();
        assert!(CaptureChannel::resolve(&config).is_none());

        let config = CaptureConfig {
            app_group_id: Some("   ".to_string()),
            ..CaptureConfig::default()
        };
        assert!(CaptureChannel::resolve(&config).is_none());
    }

    #[test]
    fn test_socket_lives_in_group_container() {
        let config = CaptureConfig {
            app_group_id: Some("group.dev.example.rtc".to_string()),
            group_container_root: Some(PathBuf::from("/containers")),
            ..CaptureConfig::default()
        };

        let channel = CaptureChannel::resolve(&config).unwrap();
        assert_eq!(channel.app_group_id, "group.dev.example.rtc");
        assert_eq!(
            channel.socket_path,
            PathBuf::from("/containers/group.dev.example.rtc/rtc_SSFD")
        );
    }
}
