//! TwiML Rendering
//!
//! Turns a `Prompt` into the XML document the telephony provider executes.

use callagent_core::Prompt;
use std::fmt::Write;

/// Builds a TwiML `<Response>` element by element.
#[derive(Debug, Default)]
pub struct TwimlBuilder {
    body: String,
}

impl TwimlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        if !text.is_empty() {
            let _ = write!(self.body, "<Say>{}</Say>", escape_xml(text));
        }
        self
    }

    pub fn play(mut self, url: &str) -> Self {
        let _ = write!(self.body, "<Play>{}</Play>", escape_xml(url));
        self
    }

    /// A gather that listens for speech or keys and posts the result to `action`.
    pub fn gather(mut self, action: &str, timeout_secs: u32) -> Self {
        let _ = write!(
            self.body,
            r#"<Gather input="speech dtmf" action="{}" method="POST" timeout="{}" speechTimeout="auto"/>"#,
            escape_xml(action),
            timeout_secs
        );
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        let _ = write!(
            self.body,
            r#"<Redirect method="POST">{}</Redirect>"#,
            escape_xml(url)
        );
        self
    }

    pub fn hangup(mut self) -> Self {
        self.body.push_str("<Hangup/>");
        self
    }

    pub fn build(self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response>{}</Response>"#,
            self.body
        )
    }
}

/// Renders a prompt, playing `audio_url` when synthesis produced one.
///
/// `base_url` is prepended to the callback paths so the provider can reach them.
pub fn render_prompt(
    prompt: &Prompt,
    audio_url: Option<&str>,
    base_url: &str,
    gather_timeout_secs: u32,
) -> String {
    let mut twiml = TwimlBuilder::new();
    twiml = match audio_url {
        Some(url) => twiml.play(&format!("{}{}", base_url, url)),
        None => twiml.say(&prompt.spoken_text),
    };

    if prompt.expect_input {
        twiml = twiml
            .gather(&format!("{}/voice/gather", base_url), gather_timeout_secs)
            .redirect(&format!("{}/voice/silence", base_url));
    }
    if prompt.hangup {
        twiml = twiml.hangup();
    }
    twiml.build()
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(
            escape_xml(r#"Tom & Jerry say "<hi>" it's fine"#),
            "Tom &amp; Jerry say &quot;&lt;hi&gt;&quot; it&apos;s fine"
        );
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn test_listen_prompt_gathers_then_redirects() {
        let xml = render_prompt(&Prompt::listen("How can I help?"), None, "", 5);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
        assert!(xml.contains("<Say>How can I help?</Say>"));
        assert!(xml.contains(r#"<Gather input="speech dtmf" action="/voice/gather" method="POST" timeout="5""#));

        let gather_at = xml.find("<Gather").unwrap();
        let redirect_at = xml.find("<Redirect").unwrap();
        assert!(gather_at < redirect_at);
        assert!(xml.contains("/voice/silence</Redirect>"));
        assert!(!xml.contains("<Hangup/>"));
    }

    #[test]
    fn test_goodbye_prompt_hangs_up_without_gather() {
        let xml = render_prompt(&Prompt::goodbye("Bye & thanks"), None, "", 5);

        assert!(xml.contains("<Say>Bye &amp; thanks</Say>"));
        assert!(xml.contains("<Hangup/>"));
        assert!(!xml.contains("<Gather"));
    }

    #[test]
    fn test_empty_hangup_has_no_say() {
        let xml = render_prompt(&Prompt::hangup(), None, "", 5);
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Hangup/></Response>"#
        );
    }

    #[test]
    fn test_audio_is_played_from_public_base() {
        let prompt = Prompt {
            spoken_text: "Sure thing".to_string(),
            expect_input: true,
            hangup: false,
            turn_index: Some(1),
        };
        let xml = render_prompt(
            &prompt,
            Some("/audio/response_CA1_1.mp3"),
            "https://agent.example.com",
            7,
        );

        assert!(xml.contains("<Play>https://agent.example.com/audio/response_CA1_1.mp3</Play>"));
        assert!(!xml.contains("<Say>"));
        assert!(xml.contains(r#"action="https://agent.example.com/voice/gather""#));
        assert!(xml.contains(r#"timeout="7""#));
    }
}
