// src/stream/build_output.rs

//! Parser for the engine's image build progress stream
//!
//! The build endpoint answers with a sequence of JSON objects, one per
//! progress unit. Every human-readable fragment is forwarded to the output
//! sink as soon as it arrives; image ids announced along the way are
//! collected, and the last one identifies the built image.

use crate::engine::ResponseConsumer;
use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::io::{BufReader, Read, Write};
use std::sync::LazyLock;
use tracing::{debug, error};

/// One decoded progress message
#[derive(Debug, Default, Deserialize)]
pub struct BuildMessage {
    /// Build log text (`Step 1/4 : FROM ...`)
    #[serde(default)]
    pub stream: Option<String>,
    /// Pull or push status line
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    /// Build error reported by the engine
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    pub error_detail: Option<ErrorDetail>,
    /// Out-of-band data; newer engines report the image id here
    #[serde(default)]
    pub aux: Option<AuxData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuxData {
    #[serde(default, rename = "ID")]
    pub id: Option<String>,
}

impl BuildMessage {
    /// The text a person watching the build should see
    pub fn display_text(&self) -> Option<String> {
        if let Some(stream) = &self.stream {
            return Some(stream.clone());
        }
        if let Some(err) = &self.error {
            return Some(format!("{}\n", err));
        }
        self.status.as_ref().map(|status| match &self.progress {
            Some(progress) => format!("{} {}\n", status, progress),
            None => format!("{}\n", status),
        })
    }

    /// Image id announced by this message, if any
    pub fn image_id(&self) -> Option<String> {
        if let Some(id) = self.aux.as_ref().and_then(|aux| aux.id.as_deref()) {
            return Some(id.to_string());
        }
        self.stream
            .as_deref()
            .and_then(|text| SUCCESS_PATTERN.captures(text))
            .map(|caps| caps[1].to_string())
    }
}

/// `Successfully built <id>` on a line of its own
static SUCCESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Successfully built ([0-9a-f]+)\s*$").unwrap());

/// Consumes a build response and remembers every announced image id
pub struct BuildOutputParser<W> {
    out: W,
    images: Vec<String>,
    last_error: Option<String>,
}

impl<W: Write> BuildOutputParser<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            images: Vec::new(),
            last_error: None,
        }
    }

    /// Image ids in the order they were announced
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Last error message the engine reported during the build
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The authoritative image id: the last one announced
    pub fn image(&self) -> Result<&str> {
        self.images
            .last()
            .map(String::as_str)
            .ok_or_else(|| Error::NoBuildImage {
                last_error: self.last_error.clone(),
            })
    }

    /// Handle a single decoded message
    pub fn handle(&mut self, message: &BuildMessage) -> Result<()> {
        if let Some(text) = message.display_text() {
            self.out.write_all(text.as_bytes())?;
            self.out.flush()?;
        }

        if let Some(err) = &message.error {
            error!("Build reported an error: {}", err);
            let detail = message
                .error_detail
                .as_ref()
                .and_then(|d| d.message.clone());
            self.last_error = Some(detail.unwrap_or_else(|| err.clone()));
        }

        if let Some(id) = message.image_id() {
            debug!("Build announced image {}", id);
            self.images.push(id);
        }

        Ok(())
    }

    /// Decode messages from `body` until it ends
    pub fn parse<R: Read + ?Sized>(&mut self, body: &mut R) -> Result<()> {
        let reader = BufReader::new(body);
        let messages = serde_json::Deserializer::from_reader(reader).into_iter::<BuildMessage>();
        for message in messages {
            self.handle(&message?)?;
        }
        Ok(())
    }
}

impl<W: Write> ResponseConsumer for BuildOutputParser<W> {
    fn consume(&mut self, body: &mut dyn Read) -> Result<()> {
        self.parse(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(body: &str) -> BuildOutputParser<Vec<u8>> {
        let mut parser = BuildOutputParser::new(Vec::new());
        parser.parse(&mut Cursor::new(body.as_bytes().to_vec())).unwrap();
        parser
    }

    #[test]
    fn test_last_image_wins() {
        let body = concat!(
            "{\"stream\":\"Step 1/2 : FROM fry:abc\\n\"}\r\n",
            "{\"stream\":\"Successfully built aaaaaaaaaaaa\\n\"}\r\n",
            "{\"stream\":\"Successfully built bbbbbbbbbbbb\\n\"}",
            "{\"stream\":\"Successfully built cccccccccccc\\n\"}\n",
        );
        let parser = parse(body);
        assert_eq!(
            parser.images(),
            &["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"]
        );
        assert_eq!(parser.image().unwrap(), "cccccccccccc");
    }

    #[test]
    fn test_no_image_is_build_failure() {
        let parser = parse("{\"stream\":\"Step 1/2 : FROM fry:abc\\n\"}");
        assert!(matches!(
            parser.image(),
            Err(Error::NoBuildImage { last_error: None })
        ));
    }

    #[test]
    fn test_forwards_text_in_order() {
        let body = concat!(
            "{\"status\":\"Pulling fs layer\",\"progress\":\"[==>  ]\"}",
            "{\"stream\":\"Step 1/1 : RUN make\\n\"}",
            "{\"stream\":\" ---> 123abc\\n\"}",
        );
        let parser = parse(body);
        let out = String::from_utf8(parser.out).unwrap();
        assert_eq!(
            out,
            "Pulling fs layer [==>  ]\nStep 1/1 : RUN make\n ---> 123abc\n"
        );
    }

    #[test]
    fn test_aux_id_counts_as_image() {
        let body = "{\"aux\":{\"ID\":\"sha256:0123abcd\"}}{\"stream\":\"Successfully built 0123abcd\\n\"}";
        let parser = parse(body);
        assert_eq!(parser.images(), &["sha256:0123abcd", "0123abcd"]);
    }

    #[test]
    fn test_remembers_error_detail() {
        let body = concat!(
            "{\"stream\":\"Step 2/3 : RUN false\\n\"}",
            "{\"errorDetail\":{\"code\":1,\"message\":\"The command '/bin/sh -c false' returned a non-zero code: 1\"},",
            "\"error\":\"The command '/bin/sh -c false' returned a non-zero code: 1\"}",
        );
        let parser = parse(body);
        assert!(parser.last_error().unwrap().contains("non-zero code: 1"));
        let err = parser.image().unwrap_err();
        assert!(err.to_string().contains("non-zero code"));
    }

    #[test]
    fn test_ignores_marker_mid_line() {
        let parser = parse("{\"stream\":\"echo Successfully built deadbeef later\\n\"}");
        assert!(parser.images().is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut parser = BuildOutputParser::new(Vec::new());
        let result = parser.parse(&mut Cursor::new(b"{\"stream\": ".to_vec()));
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
