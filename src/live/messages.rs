//! Wire messages exchanged with the live streaming endpoint.
//!
//! ## Outbound
//!
//! * Setup (first frame): model, audio response modality, prebuilt voice and
//!   system instruction.
//! * Realtime input: `{"realtimeInput": {"mediaChunks": [{"mimeType": …, "data": …}]}}`
//!   carrying either 16 kHz PCM audio or a JPEG camera frame.
//!
//! ## Inbound
//!
//! `serverContent.modelTurn.parts[].inlineData.data` carries 24 kHz PCM
//! audio; `serverContent.interrupted` signals barge-in.  A single server
//! message may produce several [`ServerEvent`]s.

use serde::{Deserialize, Serialize};

use crate::config::LiveConfig;

/// MIME type of camera frames.
pub const IMAGE_MIME: &str = "image/jpeg";

// ---------------------------------------------------------------------------
// MediaBlob / OutboundFrame
// ---------------------------------------------------------------------------

/// Base64 payload plus its MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

impl MediaBlob {
    /// 16-bit PCM audio at `sample_rate` Hz.
    pub fn audio(data: String, sample_rate: u32) -> Self {
        Self {
            data,
            mime_type: format!("audio/pcm;rate={sample_rate}"),
        }
    }

    /// A JPEG image frame.
    pub fn jpeg(data: String) -> Self {
        Self {
            data,
            mime_type: IMAGE_MIME.to_string(),
        }
    }
}

/// Messages queued for the transport's outbound task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Realtime media (audio or image).
    Media(MediaBlob),
    /// Close the connection.
    Close,
}

#[derive(Debug, Serialize)]
struct RealtimeInputMessage<'a> {
    #[serde(rename = "realtimeInput")]
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
struct RealtimeInput<'a> {
    #[serde(rename = "mediaChunks")]
    media_chunks: [&'a MediaBlob; 1],
}

/// Serialise a media blob as a realtime-input message.
pub fn realtime_input_json(blob: &MediaBlob) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [blob],
        },
    })
}

// ---------------------------------------------------------------------------
// Setup message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Build the first frame of a session from the live settings.
pub fn build_setup_message(config: &LiveConfig) -> SetupMessage {
    let instruction = config.full_instruction();
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: (!instruction.trim().is_empty()).then(|| Content {
                parts: vec![TextPart { text: instruction }],
            }),
        },
    }
}

// ---------------------------------------------------------------------------
// Server messages
// ---------------------------------------------------------------------------

/// Events the client reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The server accepted the setup message.
    SetupComplete,
    /// A chunk of base64 PCM audio.
    Audio { data: String, mime_type: Option<String> },
    /// Text produced by the model.
    Text(String),
    /// The user barged in; buffered output must be discarded.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// Error reported by the server.
    Error(String),
    /// The connection closed.
    Closed { reason: Option<String> },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    interrupted: bool,
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    message: Option<String>,
}

/// Parse one JSON server message into events, in the order the client must
/// handle them: setup, audio/text parts, interruption, turn completion,
/// error.
pub fn parse_server_message(json: &str) -> Vec<ServerEvent> {
    let message: ServerMessage = match serde_json::from_str(json) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("live: skipping unparseable server message: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = message.server_content {
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                events.push(ServerEvent::Audio {
                    data: inline.data,
                    mime_type: inline.mime_type,
                });
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(ServerEvent::Text(text));
            }
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(err) = message.error {
        events.push(ServerEvent::Error(
            err.message.unwrap_or_else(|| "unknown server error".into()),
        ));
    }

    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
