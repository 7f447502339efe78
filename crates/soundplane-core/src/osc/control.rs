//! Inbound control addresses

use super::{OscArg, OscError, OscMessage};
use crate::model::PropertyValue;

/// State an OSC client can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Device and client status strings
    Status,
    /// Calibration / carrier selection progress
    Progress,
    Serial,
    /// Names of the available zone presets
    ZonePresets,
    /// Discovered network services
    Services,
    /// Mean level and noise over the recent calibrated frames
    HistoryStats,
}

/// A decoded control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    BeginCalibrate,
    EndCalibrate,
    BeginSelectCarriers,
    NextSelectCarriersStep,
    EndSelectCarriers,
    SetDefaultCarriers,
    ZonePreset(String),
    TouchPreset(String),
    SetProperty { name: String, value: PropertyValue },
    EnableOutput(bool),
    Clear,
    /// A Kyma host answered `/osc/respond_to`
    KymaResponse,
    Query(Query),
}

fn string_arg(message: &OscMessage, index: usize) -> Result<String, OscError> {
    message
        .arg(index)
        .and_then(OscArg::as_str)
        .map(str::to_string)
        .ok_or_else(|| OscError::BadArguments(message.address.clone()))
}

/// Decode one inbound message
pub fn parse_control(message: &OscMessage) -> Result<ControlRequest, OscError> {
    let request = match message.address.as_str() {
        "/t3d/calibrate" => ControlRequest::BeginCalibrate,
        "/t3d/calibrate/end" => ControlRequest::EndCalibrate,
        "/t3d/select_carriers" => ControlRequest::BeginSelectCarriers,
        "/t3d/select_carriers/next" => ControlRequest::NextSelectCarriersStep,
        "/t3d/select_carriers/end" => ControlRequest::EndSelectCarriers,
        "/t3d/default_carriers" => ControlRequest::SetDefaultCarriers,
        "/t3d/zone_preset" => ControlRequest::ZonePreset(string_arg(message, 0)?),
        "/t3d/touch_preset" => ControlRequest::TouchPreset(string_arg(message, 0)?),
        "/t3d/property" => {
            let name = string_arg(message, 0)?;
            let value = match message.arg(1) {
                Some(OscArg::Str(s)) => PropertyValue::Text(s.clone()),
                Some(arg) => PropertyValue::Float(
                    arg.as_f32()
                        .ok_or_else(|| OscError::BadArguments(message.address.clone()))?,
                ),
                None => return Err(OscError::BadArguments(message.address.clone())),
            };
            ControlRequest::SetProperty { name, value }
        }
        "/t3d/output" => {
            let on = message
                .arg(0)
                .and_then(OscArg::as_i32)
                .ok_or_else(|| OscError::BadArguments(message.address.clone()))?;
            ControlRequest::EnableOutput(on != 0)
        }
        "/t3d/clear" => ControlRequest::Clear,
        "/t3d/query/status" => ControlRequest::Query(Query::Status),
        "/t3d/query/progress" => ControlRequest::Query(Query::Progress),
        "/t3d/query/serial" => ControlRequest::Query(Query::Serial),
        "/t3d/query/zone_presets" => ControlRequest::Query(Query::ZonePresets),
        "/t3d/query/services" => ControlRequest::Query(Query::Services),
        "/t3d/query/history" => ControlRequest::Query(Query::HistoryStats),
        "/osc/response_from" => ControlRequest::KymaResponse,
        other => return Err(OscError::UnknownAddress(other.to_string())),
    };
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        let msg = |addr: &str, args: Vec<OscArg>| OscMessage::new(addr, args);
        assert_eq!(
            parse_control(&msg("/t3d/calibrate", vec![])),
            Ok(ControlRequest::BeginCalibrate)
        );
        assert_eq!(
            parse_control(&msg("/t3d/zone_preset", vec!["chromatic".into()])),
            Ok(ControlRequest::ZonePreset("chromatic".into()))
        );
        assert_eq!(
            parse_control(&msg("/t3d/property", vec!["z_scale".into(), OscArg::Float(1.5)])),
            Ok(ControlRequest::SetProperty {
                name: "z_scale".into(),
                value: PropertyValue::Float(1.5)
            })
        );
        assert_eq!(
            parse_control(&msg("/t3d/output", vec![OscArg::Int(0)])),
            Ok(ControlRequest::EnableOutput(false))
        );
        assert_eq!(
            parse_control(&msg("/t3d/query/progress", vec![])),
            Ok(ControlRequest::Query(Query::Progress))
        );
        assert_eq!(
            parse_control(&msg("/t3d/query/services", vec![])),
            Ok(ControlRequest::Query(Query::Services))
        );
        assert_eq!(
            parse_control(&msg("/osc/response_from", vec![OscArg::Int(8000)])),
            Ok(ControlRequest::KymaResponse)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_control(&OscMessage::new("/t3d/zone_preset", vec![OscArg::Int(3)])),
            Err(OscError::BadArguments("/t3d/zone_preset".into()))
        );
        assert_eq!(
            parse_control(&OscMessage::new("/t3d/property", vec!["z_scale".into()])),
            Err(OscError::BadArguments("/t3d/property".into()))
        );
        assert_eq!(
            parse_control(&OscMessage::new("/t3d/reboot", vec![])),
            Err(OscError::UnknownAddress("/t3d/reboot".into()))
        );
    }
}
