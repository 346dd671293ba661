use crate::error::TwilioError;
use crate::Result;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_API_HOST: &str = "https://api.twilio.com";
const API_VERSION: &str = "2010-04-01";

/// Call is no longer in a state that can be updated.
const ERR_CALL_NOT_IN_PROGRESS: u32 = 21220;
/// The requested resource was not found.
const ERR_RESOURCE_NOT_FOUND: u32 = 20404;

/// A client for the Twilio voice REST API.
#[derive(Clone, Debug)]
pub struct TwilioClient {
    inner: reqwest::Client,
    account_sid: String,
    auth_token: String,
    number: Option<String>,
    api_host: String,
}

impl TwilioClient {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            number: None,
            api_host: DEFAULT_API_HOST.to_string(),
        }
    }

    /// Creates a client from `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN` and,
    /// when set, `TWILIO_PHONE_NUMBER`.
    pub fn from_env() -> Result<Self> {
        let mut client = Self::new(
            std::env::var("TWILIO_ACCOUNT_SID")?,
            std::env::var("TWILIO_AUTH_TOKEN")?,
        );
        client.number = std::env::var("TWILIO_PHONE_NUMBER").ok();
        Ok(client)
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    /// Points the client at a different API host. Used by tests and for
    /// Twilio regional endpoints (`api.<region>.twilio.com`).
    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn account_sid(&self) -> &str {
        &self.account_sid
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn number(&self) -> Option<&str> {
        self.number.as_deref()
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/{}/Accounts/{}/Calls.json",
            self.api_host, API_VERSION, self.account_sid
        )
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/{}/Accounts/{}/Calls/{}.json",
            self.api_host, API_VERSION, self.account_sid, call_sid
        )
    }

    /// Places an outbound call. Returns the provider-assigned call resource,
    /// whose `sid` is the natural key for everything downstream.
    pub async fn create_call(&self, call: CreateCall) -> Result<CallResponse> {
        let params = call.into_params();
        let resp = self
            .inner
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), resp.text().await?));
        }

        let call_resp: CallResponse = resp.json().await?;
        debug!(call_sid = %call_resp.sid, "created call");
        Ok(call_resp)
    }

    /// Force-terminates a call by setting its status to `completed`.
    ///
    /// Idempotent: a call that is already terminal (or gone) is not an error.
    pub async fn complete_call(&self, call_sid: &str) -> Result<()> {
        let params = [("Status", "completed")];
        let resp = self
            .inner
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        match api_error(status.as_u16(), resp.text().await?) {
            TwilioError::Api {
                code: Some(ERR_CALL_NOT_IN_PROGRESS | ERR_RESOURCE_NOT_FOUND),
                ..
            } => {
                debug!(call_sid, "complete_call on already-terminal call");
                Ok(())
            }
            err => Err(err),
        }
    }
}

fn api_error(status: u16, body: String) -> TwilioError {
    #[derive(Deserialize)]
    struct ApiErrorBody {
        code: Option<u32>,
        message: Option<String>,
    }

    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => TwilioError::Api {
            status,
            code: parsed.code,
            message: parsed.message.unwrap_or(body),
        },
        Err(_) => TwilioError::Api {
            status,
            code: None,
            message: body,
        },
    }
}

/// Parameters for `POST /Accounts/{sid}/Calls.json`.
#[derive(Clone, Debug)]
pub struct CreateCall {
    pub to: String,
    pub from: String,
    pub twiml_url: String,
    pub status_callback: Option<String>,
    pub machine_detection: bool,
    pub timeout_secs: Option<u32>,
}

impl CreateCall {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        twiml_url: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            twiml_url: twiml_url.into(),
            status_callback: None,
            machine_detection: false,
            timeout_secs: None,
        }
    }

    pub fn with_status_callback(mut self, url: impl Into<String>) -> Self {
        self.status_callback = Some(url.into());
        self
    }

    pub fn with_machine_detection(mut self) -> Self {
        self.machine_detection = true;
        self
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn into_params(self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("To", self.to),
            ("From", self.from),
            ("Url", self.twiml_url),
            ("Method", "POST".to_string()),
        ];
        if let Some(url) = self.status_callback {
            params.push(("StatusCallback", url));
            params.push(("StatusCallbackMethod", "POST".to_string()));
            for event in ["initiated", "ringing", "answered", "completed"] {
                params.push(("StatusCallbackEvent", event.to_string()));
            }
        }
        if self.machine_detection {
            params.push(("MachineDetection", "Enable".to_string()));
        }
        if let Some(secs) = self.timeout_secs {
            params.push(("Timeout", secs.to_string()));
        }
        params
    }
}

/// The call resource returned by call creation.
#[derive(Clone, Debug, Deserialize)]
pub struct CallResponse {
    pub sid: String,
    pub status: String,
    pub to: String,
    pub from: String,
    pub direction: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_call_params_carry_status_callback_events() {
        let call = CreateCall::new("+15551234567", "+15557654321", "https://example.com/twiml")
            .with_status_callback("https://example.com/status")
            .with_machine_detection();

        let params = call.into_params();
        let events: Vec<&str> = params
            .iter()
            .filter(|(k, _)| *k == "StatusCallbackEvent")
            .map(|(_, v)| v.as_str())
            .collect();

        assert_eq!(events, ["initiated", "ringing", "answered", "completed"]);
        assert!(params.contains(&("MachineDetection", "Enable".to_string())));
        assert!(params.contains(&("To", "+15551234567".to_string())));
    }

    #[test]
    fn api_error_parses_twilio_error_body() {
        let err = api_error(
            400,
            r#"{"code": 21220, "message": "Call is not in-progress", "status": 400}"#.to_string(),
        );
        match err {
            TwilioError::Api { status, code, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(21220));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
