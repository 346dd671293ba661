//! Minimal TwiML rendering for outbound media-stream calls.

/// A `<Stream>` noun nested under `<Connect>`, pointing the provider at a
/// media-stream WebSocket endpoint with optional custom parameters.
#[derive(Clone, Debug)]
pub struct StreamNoun {
    url: String,
    parameters: Vec<(String, String)>,
}

impl StreamNoun {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            parameters: Vec::new(),
        }
    }

    /// Adds a `<Parameter>` forwarded verbatim in the stream's `start` event
    /// as a custom parameter.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str(r#"<Connect><Stream url=""#);
        out.push_str(&escape(&self.url));
        out.push_str(r#"">"#);
        for (name, value) in &self.parameters {
            out.push_str(r#"<Parameter name=""#);
            out.push_str(&escape(name));
            out.push_str(r#"" value=""#);
            out.push_str(&escape(value));
            out.push_str(r#"" />"#);
        }
        out.push_str("</Stream></Connect>");
    }
}

#[derive(Clone, Debug)]
enum Verb {
    ConnectStream(StreamNoun),
    Say(String),
    Hangup,
    Reject,
}

/// A TwiML `<Response>` document builder.
#[derive(Clone, Debug, Default)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_stream(mut self, stream: StreamNoun) -> Self {
        self.verbs.push(Verb::ConnectStream(stream));
        self
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn reject(mut self) -> Self {
        self.verbs.push(Verb::Reject);
        self
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            match verb {
                Verb::ConnectStream(stream) => stream.render(&mut out),
                Verb::Say(text) => {
                    out.push_str("<Say>");
                    out.push_str(&escape(text));
                    out.push_str("</Say>");
                }
                Verb::Hangup => out.push_str("<Hangup />"),
                Verb::Reject => out.push_str("<Reject />"),
            }
        }
        out.push_str("</Response>");
        out
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
