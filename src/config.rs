use std::{fmt::Debug, net::IpAddr, sync::Arc, time::Duration};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use webrtc::{
    api::setting_engine::SettingEngine,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::configuration::RTCConfiguration,
};
use webrtc_ice::network_type::NetworkType;

const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_PRESENCE_PUBLISH_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_DATA_CHANNEL_LABEL: &str = "data";

/// Configuration for [`crate::world::WorldConnection`] and [`crate::mesh::MeshManager`].
#[derive(Derivative)]
#[derivative(Clone, Debug)]
pub struct WorldConfig {
    /// Identity of the local agent. Must be non-empty and unique in the world.
    pub local_agent_id: String,
    /// When false, links are created in `Idle` and only answer remote offers.
    pub realtime_links_enabled: bool,
    /// Period for republishing the local presence record. `None` publishes on change only.
    pub presence_publish_interval: Option<Duration>,
    pub data_channel_label: String,
    pub transport: WebRTCTransportConfig,
    pub spatial_audio: SpatialAudioConfig,
}

impl WorldConfig {
    pub fn new(local_agent_id: impl Into<String>) -> Self {
        Self {
            local_agent_id: local_agent_id.into(),
            realtime_links_enabled: true,
            presence_publish_interval: Some(DEFAULT_PRESENCE_PUBLISH_INTERVAL),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            transport: WebRTCTransportConfig::default(),
            spatial_audio: SpatialAudioConfig::default(),
        }
    }
}

/// Configuration for [`crate::rtc_channel::RtcChannel`].
#[derive(Derivative)]
#[derivative(Clone, Debug)]
pub struct WebRTCTransportConfig {
    #[derivative(Debug = "ignore")]
    pub configuration: RTCConfiguration,
    pub announced_ips: Vec<IpAddr>,
    pub ice_disconnected_timeout: Option<Duration>,
    pub ice_failed_timeout: Option<Duration>,
    pub ice_keep_alive_interval: Option<Duration>,
    pub network_types: Vec<NetworkType>,
    pub ice_username_fragment: Option<String>,
    pub ice_password: Option<String>,
}

impl Default for WebRTCTransportConfig {
    fn default() -> Self {
        Self {
            configuration: RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls: vec![DEFAULT_STUN_SERVER.to_owned()],
                    ..Default::default()
                }],
                ..Default::default()
            },
            announced_ips: vec![],
            ice_disconnected_timeout: None,
            ice_failed_timeout: None,
            ice_keep_alive_interval: None,
            network_types: vec![],
            ice_username_fragment: None,
            ice_password: None,
        }
    }
}

impl WebRTCTransportConfig {
    pub fn configuration(&self) -> RTCConfiguration {
        self.configuration.clone()
    }

    pub(crate) fn setting_engine(&self) -> SettingEngine {
        let mut setting_engine = SettingEngine::default();

        if self.ice_disconnected_timeout.is_some()
            || self.ice_failed_timeout.is_some()
            || self.ice_keep_alive_interval.is_some()
        {
            setting_engine.set_ice_timeouts(
                self.ice_disconnected_timeout,
                self.ice_failed_timeout,
                self.ice_keep_alive_interval,
            );
        }

        if !self.announced_ips.is_empty() {
            let announced_ips = Arc::new(self.announced_ips.clone());
            setting_engine.set_ip_filter(Box::new({
                let announced_ips = Arc::clone(&announced_ips);
                move |ip| announced_ips.contains(&ip)
            }));
        }

        if !self.network_types.is_empty() {
            setting_engine.set_network_types(self.network_types.clone());
        }

        if self.ice_username_fragment.is_some() || self.ice_password.is_some() {
            let username = self.ice_username_fragment.clone().unwrap_or_default();
            let password = self.ice_password.clone().unwrap_or_default();
            setting_engine.set_ice_credentials(username, password);
        }

        setting_engine
    }
}

/// Panner parameters handed to the external audio engine along with each placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialAudioConfig {
    pub panning_model: PanningModel,
    pub distance_model: DistanceModel,
    pub ref_distance: f64,
    pub max_distance: f64,
}

impl Default for SpatialAudioConfig {
    fn default() -> Self {
        Self {
            panning_model: PanningModel::Hrtf,
            distance_model: DistanceModel::Inverse,
            ref_distance: 1.0,
            max_distance: 10000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanningModel {
    EqualPower,
    Hrtf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceModel {
    Linear,
    Inverse,
    Exponential,
}
