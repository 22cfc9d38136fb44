//! PowerShell command encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

/// Encode a script for `powershell.exe -EncodedCommand`.
///
/// PowerShell expects the script as UTF-16LE bytes, base64 wrapped.
pub fn encode_powershell_command(script: &str) -> String {
    let utf16le: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    BASE64_STANDARD.encode(utf16le)
}

/// Quote a value as a single-quoted PowerShell string literal.
pub fn escape_powershell_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
