//! Client for the ESPA status server.
//!
//! The server speaks XML-RPC. Requests are written with the quick-xml
//! writer and POSTed with a blocking reqwest client.

use crate::types::{EspaError, EspaResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::time::Duration;

/// Timeout for a single status call
const STATUS_TIMEOUT_SECS: u64 = 60;

/// Status updates sent while a product is processed
pub trait StatusReporter {
    /// Mark a product as being processed at `location`
    fn update_status(&self, product_id: &str, order_id: &str, location: &str, status: &str) -> EspaResult<bool>;

    /// Report a failed product together with its log
    fn set_scene_error(&self, product_id: &str, order_id: &str, location: &str, log: &str) -> EspaResult<bool>;

    /// Report the distributed product and checksum files
    fn mark_scene_complete(
        &self,
        product_id: &str,
        order_id: &str,
        location: &str,
        product_file: &str,
        cksum_file: &str,
        log: &str,
    ) -> EspaResult<bool>;
}

/// Scalar returned by an XML-RPC method
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    Boolean(bool),
    Int(i64),
    String(String),
    Nil,
}

impl XmlRpcValue {
    /// Truthiness of the value the way the status server means it
    pub fn as_bool(&self) -> bool {
        match self {
            XmlRpcValue::Boolean(b) => *b,
            XmlRpcValue::Int(i) => *i != 0,
            XmlRpcValue::String(s) => !s.is_empty(),
            XmlRpcValue::Nil => false,
        }
    }
}

fn write_error(e: quick_xml::Error) -> EspaError {
    EspaError::Status(format!("Failed to build XML-RPC request: {}", e))
}

/// Serialize a `methodCall` with string parameters
pub fn method_call(method: &str, params: &[&str]) -> EspaResult<String> {
    let mut writer = Writer::new(Vec::new());
    let mut write = |event: Event| writer.write_event(event).map_err(write_error);

    write(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    write(Event::Start(BytesStart::new("methodCall")))?;
    write(Event::Start(BytesStart::new("methodName")))?;
    write(Event::Text(BytesText::new(method)))?;
    write(Event::End(BytesEnd::new("methodName")))?;
    write(Event::Start(BytesStart::new("params")))?;
    for param in params {
        write(Event::Start(BytesStart::new("param")))?;
        write(Event::Start(BytesStart::new("value")))?;
        write(Event::Start(BytesStart::new("string")))?;
        write(Event::Text(BytesText::new(param)))?;
        write(Event::End(BytesEnd::new("string")))?;
        write(Event::End(BytesEnd::new("value")))?;
        write(Event::End(BytesEnd::new("param")))?;
    }
    write(Event::End(BytesEnd::new("params")))?;
    write(Event::End(BytesEnd::new("methodCall")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| EspaError::Status(format!("XML-RPC request is not UTF-8: {}", e)))
}

fn scalar(tag: &str, text: &str) -> EspaResult<XmlRpcValue> {
    let bad = |e: String| EspaError::Status(format!("Bad XML-RPC {} value [{}]: {}", tag, text, e));
    match tag {
        "boolean" => match text.trim() {
            "1" => Ok(XmlRpcValue::Boolean(true)),
            "0" => Ok(XmlRpcValue::Boolean(false)),
            other => Err(bad(format!("expected 0 or 1, got {}", other))),
        },
        "int" | "i4" | "i8" => text.trim().parse().map(XmlRpcValue::Int).map_err(|e| bad(e.to_string())),
        _ => Ok(XmlRpcValue::String(text.to_string())),
    }
}

/// Parse a `methodResponse`, turning a `fault` into an error
pub fn parse_response(xml: &str) -> EspaResult<XmlRpcValue> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_fault = false;
    let mut in_value = false;
    let mut current_tag = String::new();
    let mut fault_member = String::new();
    let mut fault_string = String::new();
    let mut fault_code = String::new();
    let mut result: Option<XmlRpcValue> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                current_tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match current_tag.as_str() {
                    "fault" => in_fault = true,
                    "value" => in_value = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if !in_fault && result.is_none() {
                    match tag.as_str() {
                        "nil" => result = Some(XmlRpcValue::Nil),
                        "string" => result = Some(XmlRpcValue::String(String::new())),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "value" {
                    in_value = false;
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| EspaError::Status(format!("Bad XML-RPC text: {}", err)))?
                    .to_string();

                if in_fault {
                    if current_tag == "name" {
                        fault_member = text;
                    } else if in_value {
                        match fault_member.as_str() {
                            "faultString" => fault_string = text,
                            "faultCode" => fault_code = text,
                            _ => {}
                        }
                    }
                } else if in_value && result.is_none() {
                    let tag = if current_tag == "value" { "string" } else { current_tag.as_str() };
                    result = Some(scalar(tag, &text)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EspaError::Status(format!(
                    "Failed to parse XML-RPC response at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if in_fault {
        return Err(EspaError::Status(format!(
            "XML-RPC fault {}: {}",
            fault_code, fault_string
        )));
    }

    Ok(result.unwrap_or(XmlRpcValue::Nil))
}

/// XML-RPC connection to the status server
pub struct XmlRpcClient {
    url: String,
    client: reqwest::blocking::Client,
}

impl XmlRpcClient {
    pub fn new(url: &str) -> EspaResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(STATUS_TIMEOUT_SECS))
            .build()
            .map_err(|e| EspaError::Status(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke `method` and return its result
    pub fn call(&self, method: &str, params: &[&str]) -> EspaResult<XmlRpcValue> {
        log::debug!("XML-RPC call {} on {}", method, self.url);

        let body = method_call(method, params)?;
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .map_err(|e| EspaError::Status(format!("XML-RPC {} request failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(EspaError::Status(format!(
                "XML-RPC {} failed with status: {}",
                method,
                response.status()
            )));
        }

        let text = response
            .text()
            .map_err(|e| EspaError::Status(format!("Failed to read XML-RPC response: {}", e)))?;
        parse_response(&text)
    }
}

impl StatusReporter for XmlRpcClient {
    fn update_status(&self, product_id: &str, order_id: &str, location: &str, status: &str) -> EspaResult<bool> {
        self.call("update_status", &[product_id, order_id, location, status])
            .map(|v| v.as_bool())
    }

    fn set_scene_error(&self, product_id: &str, order_id: &str, location: &str, log: &str) -> EspaResult<bool> {
        self.call("set_scene_error", &[product_id, order_id, location, log])
            .map(|v| v.as_bool())
    }

    fn mark_scene_complete(
        &self,
        product_id: &str,
        order_id: &str,
        location: &str,
        product_file: &str,
        cksum_file: &str,
        log: &str,
    ) -> EspaResult<bool> {
        self.call(
            "mark_scene_complete",
            &[product_id, order_id, location, product_file, cksum_file, log],
        )
        .map(|v| v.as_bool())
    }
}
