//! JSON wire format of the live model's bidirectional stream.
//!
//! Client → server:
//! - one `setup` message right after the socket opens;
//! - one `realtimeInput` message per captured frame.
//!
//! Server → client:
//! - `setupComplete` once the session is ready;
//! - `serverContent` carrying audio parts, `interrupted` and `turnComplete`;
//! - `goAway` before the server drops the connection.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ServerMessage, SessionSetup};
use crate::codec::EncodedFrame;
use crate::error::{MentoraError, Result};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// One base64 media payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// Per-frame message handed to the channel: `{"media": {data, mimeType}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub media: MediaBlob,
}

impl From<EncodedFrame> for AudioFrameMessage {
    fn from(frame: EncodedFrame) -> Self {
        Self {
            media: MediaBlob {
                data: frame.data,
                mime_type: frame.mime_type,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload {
    model: String,
    generation_config: Value,
    system_instruction: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<SetupPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput>,
}

/// Model ids go on the wire with their `models/` resource prefix.
fn model_resource(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Serialise the session setup message.
pub fn setup_message(setup: &SessionSetup) -> Result<String> {
    let payload = SetupPayload {
        model: model_resource(&setup.model),
        generation_config: json!({
            "responseModalities": [setup.response_modality],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": setup.voice_name }
                }
            }
        }),
        system_instruction: json!({ "parts": [{ "text": setup.system_instruction }] }),
        input_audio_transcription: setup.transcribe.then(|| json!({})),
        output_audio_transcription: setup.transcribe.then(|| json!({})),
    };
    Ok(serde_json::to_string(&ClientMessage {
        setup: Some(payload),
        realtime_input: None,
    })?)
}

/// Serialise one captured frame as a realtime input message.
pub fn realtime_input_message(frame: AudioFrameMessage) -> Result<String> {
    Ok(serde_json::to_string(&ClientMessage {
        setup: None,
        realtime_input: Some(RealtimeInput {
            media_chunks: vec![frame.media],
        }),
    })?)
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<RawServerContent>,
    go_away: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawContent>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    input_transcription: Option<RawTranscription>,
    output_transcription: Option<RawTranscription>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<MediaPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaPayload {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawTranscription {
    #[serde(default)]
    text: String,
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    SetupComplete,
    Content(ServerMessage),
    /// Server announced it will disconnect.
    GoAway,
    /// Anything this client does not act on (tool calls, usage metadata).
    Other,
}

/// Parse one inbound text frame.
///
/// # Errors
/// `MentoraError::Channel` if the frame is not valid JSON.
pub fn parse_server_message(raw: &str) -> Result<ServerFrame> {
    let message: RawServerMessage = serde_json::from_str(raw)
        .map_err(|e| MentoraError::Channel(format!("malformed server message: {e}")))?;

    if message.setup_complete.is_some() {
        return Ok(ServerFrame::SetupComplete);
    }
    if let Some(content) = message.server_content {
        let audio = content
            .model_turn
            .map(|turn| {
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .map(|blob| blob.data)
                    .collect()
            })
            .unwrap_or_default();
        return Ok(ServerFrame::Content(ServerMessage {
            audio,
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
            output_transcript: content.output_transcription.map(|t| t.text),
            input_transcript: content.input_transcription.map(|t| t.text),
        }));
    }
    if message.go_away.is_some() {
        return Ok(ServerFrame::GoAway);
    }
    Ok(ServerFrame::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_carries_voice_and_instruction() {
        let raw = setup_message(&SessionSetup::default()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();

        let setup = &value["setup"];
        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-12-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert!(setup["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("career mentor"));
        assert!(setup.get("outputAudioTranscription").is_none());
        assert!(value.get("realtimeInput").is_none());
    }

    #[test]
    fn transcription_is_requested_when_enabled() {
        let setup = SessionSetup {
            transcribe: true,
            model: "models/custom".into(),
            ..SessionSetup::default()
        };
        let value: Value = serde_json::from_str(&setup_message(&setup).unwrap()).unwrap();
        assert_eq!(value["setup"]["model"], "models/custom");
        assert!(value["setup"]["inputAudioTranscription"].is_object());
        assert!(value["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn audio_frame_message_shape() {
        let frame = EncodedFrame {
            data: "AAA=".into(),
            mime_type: "audio/pcm;rate=16000".into(),
        };
        let message = AudioFrameMessage::from(frame);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["media"]["data"], "AAA=");
        assert_eq!(value["media"]["mimeType"], "audio/pcm;rate=16000");

        let wire: Value =
            serde_json::from_str(&realtime_input_message(message).unwrap()).unwrap();
        assert_eq!(wire["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert!(wire.get("setup").is_none());
    }

    #[test]
    fn parses_setup_complete() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#).unwrap(),
            ServerFrame::SetupComplete
        );
    }

    #[test]
    fn collects_every_inline_audio_part() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
            {"text":"thinking"},
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"BBBB"}}
        ]}}}"#;
        let ServerFrame::Content(message) = parse_server_message(raw).unwrap() else {
            panic!("expected content");
        };
        assert_eq!(message.audio, vec!["AAAA".to_string(), "BBBB".to_string()]);
        assert!(!message.interrupted);
        assert!(!message.turn_complete);
    }

    #[test]
    fn parses_interrupted_and_turn_complete_flags() {
        let ServerFrame::Content(message) =
            parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap()
        else {
            panic!("expected content");
        };
        assert!(message.interrupted);
        assert!(message.audio.is_empty());

        let ServerFrame::Content(message) = parse_server_message(
            r#"{"serverContent":{"turnComplete":true,"outputTranscription":{"text":"Good luck"}}}"#,
        )
        .unwrap() else {
            panic!("expected content");
        };
        assert!(message.turn_complete);
        assert_eq!(message.output_transcript.as_deref(), Some("Good luck"));
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert_eq!(
            parse_server_message(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap(),
            ServerFrame::Other
        );
        assert_eq!(
            parse_server_message(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap(),
            ServerFrame::GoAway
        );
        assert!(matches!(
            parse_server_message("not json"),
            Err(MentoraError::Channel(_))
        ));
    }
}
