//! Status and error tokens reported by the rangefinder.

/// Returns the operator-facing text for a device token, prefixed with the token itself.
///
/// An empty token means the device sent nothing back. Unknown tokens yield an empty
/// string.
pub fn describe(token: &str) -> String {
    let text = match token {
        "" => return String::from("No response from laser."),
        "E15" => "Sensor slow to respond",
        "E16" => "Too much target reflectance",
        "E17" => "Too much ambient light",
        "E18" => "DX mode: Measured greater than specified range",
        "E19" => "DX mode: Target speed > 10m/s",
        "E23" => "Temp below 14F",
        "E24" => "Temp above 140F",
        "E31" => "Faulty memory hardware, EEPROM error",
        "E51" => "High ambient light or hardware error",
        "E52" => "Faulty laser diode",
        "E53" => "EEPROM parameter not set (or divide by zero error)",
        "E54" => "Hardware error (PLL)",
        "E55" => "Hardware error",
        "E61" => "Invalid serial command",
        "E62" => "Hardware error or Parity error in serial settings",
        "E63" => "SIO Overflow",
        "E64" => "Framing - error SIO",
        "LO" => "Laser is on",
        "LF" => "Laser is off",
        _ => return String::new(),
    };
    format!("{}: {}", token, text)
}

/// True for the `Exx` tokens the device uses to report a fault.
pub fn is_error_token(token: &str) -> bool {
    token.len() == 3 && token.starts_with('E') && token[1..].bytes().all(|b| b.is_ascii_digit())
}
