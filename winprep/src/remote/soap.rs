//! WS-Management SOAP envelopes for the Windows remote shell.
//!
//! Envelopes are built as strings and responses are read by tag extraction;
//! the handful of elements we need never nest or repeat in ways that would
//! require a real XML parser.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::errors::{WinprepError, WinprepResult};

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// WS-Management fault raised when a Receive saw no output within the
/// operation timeout. The command is still running; receive again.
pub const OPERATION_TIMEOUT_FAULT: &str = "2150858793";

const MAX_ENVELOPE_SIZE: u32 = 153_600;

/// Per-request header values.
#[derive(Debug, Clone)]
pub struct Header<'a> {
    pub endpoint: &'a str,
    pub message_id: &'a str,
    pub operation_timeout_secs: u64,
    pub shell_id: Option<&'a str>,
}

impl Header<'_> {
    fn render(&self, action: &str, options: &str) -> String {
        let selector = self
            .shell_id
            .map(|id| {
                format!(
                    r#"
    <w:SelectorSet>
      <w:Selector Name="ShellId">{}</w:Selector>
    </w:SelectorSet>"#,
                    xml_escape(id)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<s:Header>
    <a:To>{endpoint}</a:To>
    <w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE_URI}</w:ResourceURI>
    <a:ReplyTo>
      <a:Address s:mustUnderstand="true">{ANONYMOUS}</a:Address>
    </a:ReplyTo>
    <a:Action s:mustUnderstand="true">{action}</a:Action>
    <a:MessageID>uuid:{message_id}</a:MessageID>
    <w:MaxEnvelopeSize s:mustUnderstand="true">{MAX_ENVELOPE_SIZE}</w:MaxEnvelopeSize>
    <w:OperationTimeout>PT{timeout}S</w:OperationTimeout>{selector}{options}
  </s:Header>"#,
            endpoint = xml_escape(self.endpoint),
            message_id = self.message_id,
            timeout = self.operation_timeout_secs,
        )
    }
}

fn envelope(header: &Header<'_>, action: &str, body: &str) -> String {
    envelope_with_options(header, action, "", body)
}

fn envelope_with_options(header: &Header<'_>, action: &str, options: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  {}
  {}
</s:Envelope>"#,
        header.render(action, options),
        body
    )
}

pub fn create_shell(header: &Header<'_>) -> String {
    let body = r#"<s:Body>
    <rsp:Shell>
      <rsp:InputStreams>stdin</rsp:InputStreams>
      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
    </rsp:Shell>
  </s:Body>"#;
    let options = r#"
    <w:OptionSet>
      <w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>
      <w:Option Name="WINRS_CODEPAGE">65001</w:Option>
    </w:OptionSet>"#;
    envelope_with_options(header, ACTION_CREATE, options, body)
}

pub fn delete_shell(header: &Header<'_>) -> String {
    envelope(header, ACTION_DELETE, "<s:Body/>")
}

pub fn command(header: &Header<'_>, command_line: &str) -> String {
    let body = format!(
        r#"<s:Body>
    <rsp:CommandLine>
      <rsp:Command>{}</rsp:Command>
    </rsp:CommandLine>
  </s:Body>"#,
        xml_escape(command_line)
    );
    envelope(header, ACTION_COMMAND, &body)
}

pub fn receive(header: &Header<'_>, command_id: &str) -> String {
    let body = format!(
        r#"<s:Body>
    <rsp:Receive>
      <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
    </rsp:Receive>
  </s:Body>"#,
        xml_escape(command_id)
    );
    envelope(header, ACTION_RECEIVE, &body)
}

pub fn signal_terminate(header: &Header<'_>, command_id: &str) -> String {
    let body = format!(
        r#"<s:Body>
    <rsp:Signal CommandId="{}">
      <rsp:Code>{SIGNAL_TERMINATE}</rsp:Code>
    </rsp:Signal>
  </s:Body>"#,
        xml_escape(command_id)
    );
    envelope(header, ACTION_SIGNAL, &body)
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

pub fn parse_shell_id(response: &str) -> WinprepResult<String> {
    element_text(response, "rsp:ShellId")
        .or_else(|| selector_text(response, "ShellId"))
        .map(str::to_string)
        .ok_or_else(|| WinprepError::InvalidOutput("no ShellId in create shell response".into()))
}

pub fn parse_command_id(response: &str) -> WinprepResult<String> {
    element_text(response, "rsp:CommandId")
        .map(str::to_string)
        .ok_or_else(|| WinprepError::InvalidOutput("no CommandId in command response".into()))
}

/// One Receive response worth of output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub done: bool,
}

pub fn parse_receive(response: &str) -> WinprepResult<ReceiveOutput> {
    let mut output = ReceiveOutput {
        done: response.contains("CommandState/Done"),
        ..Default::default()
    };

    let mut rest = response;
    while let Some(start) = rest.find("<rsp:Stream ") {
        let tag = &rest[start..];
        let Some(tag_end) = tag.find('>') else {
            break;
        };
        let open = &tag[..tag_end];

        // Self-closing stream elements carry only the End attribute
        if open.ends_with('/') {
            rest = &tag[tag_end + 1..];
            continue;
        }

        let content = &tag[tag_end + 1..];
        let Some(close) = content.find("</rsp:Stream>") else {
            return Err(WinprepError::InvalidOutput("unterminated rsp:Stream".into()));
        };
        let encoded = content[..close].trim();

        if !encoded.is_empty() {
            let decoded = BASE64
                .decode(encoded)
                .map_err(|e| WinprepError::InvalidOutput(format!("bad stream encoding: {}", e)))?;
            if open.contains(r#"Name="stderr""#) {
                output.stderr.extend_from_slice(&decoded);
            } else {
                output.stdout.extend_from_slice(&decoded);
            }
        }
        rest = &content[close..];
    }

    if let Some(code) = element_text(response, "rsp:ExitCode") {
        let code = code
            .trim()
            .parse::<i64>()
            .map_err(|e| WinprepError::InvalidOutput(format!("bad exit code {:?}: {}", code, e)))?;
        // Windows reports NTSTATUS-style codes as unsigned 32-bit values
        output.exit_code = Some(code as i32);
    }

    Ok(output)
}

/// Human-readable text of a SOAP fault, if the response is one.
pub fn fault_reason(response: &str) -> Option<String> {
    if !response.contains("Fault") {
        return None;
    }
    element_text(response, "s:Text")
        .or_else(|| element_text(response, "f:Message"))
        .map(|s| s.trim().to_string())
        .or_else(|| Some("unknown WS-Management fault".to_string()))
}

fn element_text<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}", name);
    let close = format!("</{}>", name);
    let start = response.find(&open)?;
    let after_open = &response[start + open.len()..];
    // Reject prefix matches such as <rsp:ExitCodeX>
    if !after_open.starts_with(['>', ' ']) {
        return None;
    }
    let content_start = after_open.find('>')? + 1;
    let content = &after_open[content_start..];
    let end = content.find(&close)?;
    Some(&content[..end])
}

fn selector_text<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!(r#"Name="{}">"#, name);
    let start = response.find(&marker)? + marker.len();
    let end = response[start..].find("</")?;
    Some(&response[start..start + end])
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
