use super::*;

const PONG: &str = "pong";
const CONVERSATION_INITIATION_CLIENT_DATA: &str = "conversation_initiation_client_data";

/// A caller audio chunk forwarded to the agent.
///
/// The chunk must already be base64 encoded; it is embedded untouched.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserAudioChunk {
    pub user_audio_chunk: String,
}

impl UserAudioChunk {
    pub fn new(audio_chunk: impl Into<String>) -> Self {
        UserAudioChunk {
            user_audio_chunk: audio_chunk.into(),
        }
    }
}

impl TryFrom<UserAudioChunk> for Message {
    type Error = ConvAIError;
    fn try_from(chunk: UserAudioChunk) -> Result<Self, Self::Error> {
        Ok(Message::Text(serde_json::to_string(&chunk)?))
    }
}

/// Reply to a server `ping`. The `event_id` must match the ping's.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Pong {
    r#type: String,
    pub event_id: u32,
}

impl Pong {
    pub fn new(event_id: u32) -> Self {
        Pong {
            r#type: PONG.to_string(),
            event_id,
        }
    }
}

impl TryFrom<Pong> for Message {
    type Error = ConvAIError;
    fn try_from(pong: Pong) -> Result<Self, Self::Error> {
        Ok(Message::Text(serde_json::to_string(&pong)?))
    }
}

/// The first client frame of a session, overriding agent configuration for
/// this one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInitiationClientData {
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_config_override: Option<OverrideData>,
}

impl ConversationInitiationClientData {
    pub fn with_override_data(mut self, overrides: OverrideData) -> Self {
        self.conversation_config_override = Some(overrides);
        self
    }
}

impl Default for ConversationInitiationClientData {
    fn default() -> Self {
        ConversationInitiationClientData {
            r#type: CONVERSATION_INITIATION_CLIENT_DATA.to_string(),
            conversation_config_override: None,
        }
    }
}

impl TryFrom<ConversationInitiationClientData> for Message {
    type Error = ConvAIError;
    fn try_from(data: ConversationInitiationClientData) -> Result<Self, Self::Error> {
        Ok(Message::Text(serde_json::to_string(&data)?))
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct OverrideData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOverrideData>,
}

impl OverrideData {
    pub fn with_agent_override_data(mut self, agent: AgentOverrideData) -> Self {
        self.agent = Some(agent);
        self
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AgentOverrideData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverrideData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl AgentOverrideData {
    pub fn with_prompt_override_data(mut self, prompt: PromptOverrideData) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn override_first_message(mut self, first_message: impl Into<String>) -> Self {
        self.first_message = Some(first_message.into());
        self
    }

    pub fn override_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PromptOverrideData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl PromptOverrideData {
    pub fn override_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiation_data_serializes_overrides() {
        let data = ConversationInitiationClientData::default().with_override_data(
            OverrideData::default().with_agent_override_data(
                AgentOverrideData::default()
                    .with_prompt_override_data(
                        PromptOverrideData::default().override_prompt("You are helpful."),
                    )
                    .override_first_message("Hi, this is Ava."),
            ),
        );

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "conversation_initiation_client_data");
        assert_eq!(
            json["conversation_config_override"]["agent"]["first_message"],
            "Hi, this is Ava."
        );
        assert_eq!(
            json["conversation_config_override"]["agent"]["prompt"]["prompt"],
            "You are helpful."
        );
        assert!(json["conversation_config_override"]["agent"]
            .get("language")
            .is_none());
    }

    #[test]
    fn bare_initiation_data_omits_override_key() {
        let json = serde_json::to_string(&ConversationInitiationClientData::default()).unwrap();
        assert_eq!(json, r#"{"type":"conversation_initiation_client_data"}"#);
    }

    #[test]
    fn pong_serializes_with_event_id() {
        let json = serde_json::to_string(&Pong::new(7)).unwrap();
        assert_eq!(json, r#"{"type":"pong","event_id":7}"#);
    }

    #[test]
    fn user_audio_chunk_is_passed_through() {
        let json = serde_json::to_string(&UserAudioChunk::new("AAECAw==")).unwrap();
        assert_eq!(json, r#"{"user_audio_chunk":"AAECAw=="}"#);
    }
}
