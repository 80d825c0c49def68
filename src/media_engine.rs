use webrtc::{
    api::media_engine::{
        MediaEngine, MIME_TYPE_G722, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU,
    },
    error::Result,
    rtp_transceiver::rtp_codec::{
        RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability,
        RTPCodecType,
    },
    sdp::extmap,
};

/// Opus payload type shared by every peer in the mesh.
pub const OPUS_PAYLOAD_TYPE: u8 = 111;

fn audio_codec(
    mime_type: &str,
    clock_rate: u32,
    channels: u16,
    fmtp: &str,
    payload_type: u8,
) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate,
            channels,
            sdp_fmtp_line: fmtp.to_owned(),
            rtcp_feedback: vec![],
        },
        payload_type,
        ..Default::default()
    }
}

/// Registers the audio codecs a mesh link negotiates. Links carry no video.
pub fn register_default_codecs(me: &mut MediaEngine) -> Result<()> {
    let audio_codecs = vec![
        audio_codec(
            MIME_TYPE_OPUS,
            48000,
            2,
            "minptime=10;useinbandfec=1",
            OPUS_PAYLOAD_TYPE,
        ),
        audio_codec(MIME_TYPE_G722, 8000, 0, "", 9),
        audio_codec(MIME_TYPE_PCMU, 8000, 0, "", 0),
        audio_codec(MIME_TYPE_PCMA, 8000, 0, "", 8),
    ];

    for codec in audio_codecs {
        me.register_codec(codec, RTPCodecType::Audio)?;
    }

    Ok(())
}

pub fn register_extensions(media_engine: &mut MediaEngine) -> Result<()> {
    let extension_audio = vec![
        extmap::SDES_MID_URI,
        extmap::SDES_RTP_STREAM_ID_URI,
        extmap::AUDIO_LEVEL_URI,
    ];

    for extension in extension_audio {
        media_engine.register_header_extension(
            RTCRtpHeaderExtensionCapability {
                uri: extension.to_owned(),
            },
            RTPCodecType::Audio,
            None,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_register_audio_only() {
        let mut me = MediaEngine::default();
        register_default_codecs(&mut me).expect("codecs");
        register_extensions(&mut me).expect("extensions");
    }
}
