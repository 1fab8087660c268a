//! Cayenne Low Power Payload.
//!
//! Each item is `[channel, type, value..]`. Decoded payloads are grouped by
//! type, then keyed by channel.
use lora_as_error::{ASError, ASResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DIGITAL_INPUT: u8 = 0;
const DIGITAL_OUTPUT: u8 = 1;
const ANALOG_INPUT: u8 = 2;
const ANALOG_OUTPUT: u8 = 3;
const ILLUMINANCE_SENSOR: u8 = 101;
const PRESENCE_SENSOR: u8 = 102;
const TEMPERATURE_SENSOR: u8 = 103;
const HUMIDITY_SENSOR: u8 = 104;
const ACCELEROMETER: u8 = 113;
const BAROMETER: u8 = 115;
const GYROMETER: u8 = 134;
const GPS_LOCATION: u8 = 136;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CayenneLpp {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digital_input: BTreeMap<u8, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digital_output: BTreeMap<u8, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analog_input: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analog_output: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub illuminance_sensor: BTreeMap<u8, u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub presence_sensor: BTreeMap<u8, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub temperature_sensor: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub humidity_sensor: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accelerometer: BTreeMap<u8, Xyz>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub barometer: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gyrometer: BTreeMap<u8, Xyz>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gps_location: BTreeMap<u8, GpsLocation>,
}

impl CayenneLpp {
    pub fn decode(b: &[u8]) -> ASResult<Self> {
        let mut out = CayenneLpp::default();
        let mut r = Reader { b, pos: 0 };

        while r.remaining() > 0 {
            let channel = r.u8()?;
            let kind = r.u8()?;
            match kind {
                DIGITAL_INPUT => {
                    out.digital_input.insert(channel, r.u8()?);
                }
                DIGITAL_OUTPUT => {
                    out.digital_output.insert(channel, r.u8()?);
                }
                ANALOG_INPUT => {
                    out.analog_input.insert(channel, f64::from(r.i16()?) / 100.0);
                }
                ANALOG_OUTPUT => {
                    out.analog_output.insert(channel, f64::from(r.i16()?) / 100.0);
                }
                ILLUMINANCE_SENSOR => {
                    out.illuminance_sensor.insert(channel, r.u16()?);
                }
                PRESENCE_SENSOR => {
                    out.presence_sensor.insert(channel, r.u8()?);
                }
                TEMPERATURE_SENSOR => {
                    out.temperature_sensor.insert(channel, f64::from(r.i16()?) / 10.0);
                }
                HUMIDITY_SENSOR => {
                    out.humidity_sensor.insert(channel, f64::from(r.u8()?) / 2.0);
                }
                ACCELEROMETER => {
                    out.accelerometer.insert(channel, r.xyz(1000.0)?);
                }
                BAROMETER => {
                    out.barometer.insert(channel, f64::from(r.u16()?) / 10.0);
                }
                GYROMETER => {
                    out.gyrometer.insert(channel, r.xyz(100.0)?);
                }
                GPS_LOCATION => {
                    out.gps_location.insert(
                        channel,
                        GpsLocation {
                            latitude: f64::from(r.i24()?) / 10_000.0,
                            longitude: f64::from(r.i24()?) / 10_000.0,
                            altitude: f64::from(r.i24()?) / 100.0,
                        },
                    );
                }
                other => {
                    return Err(ASError::Codec(format!(
                        "invalid Cayenne LPP data type {other} on channel {channel}"
                    )))
                }
            }
        }
        Ok(out)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (c, v) in &self.digital_input {
            out.extend([*c, DIGITAL_INPUT, *v]);
        }
        for (c, v) in &self.digital_output {
            out.extend([*c, DIGITAL_OUTPUT, *v]);
        }
        for (c, v) in &self.analog_input {
            out.extend([*c, ANALOG_INPUT]);
            out.extend(scaled_i16(*v, 100.0));
        }
        for (c, v) in &self.analog_output {
            out.extend([*c, ANALOG_OUTPUT]);
            out.extend(scaled_i16(*v, 100.0));
        }
        for (c, v) in &self.illuminance_sensor {
            out.extend([*c, ILLUMINANCE_SENSOR]);
            out.extend(v.to_be_bytes());
        }
        for (c, v) in &self.presence_sensor {
            out.extend([*c, PRESENCE_SENSOR, *v]);
        }
        for (c, v) in &self.temperature_sensor {
            out.extend([*c, TEMPERATURE_SENSOR]);
            out.extend(scaled_i16(*v, 10.0));
        }
        for (c, v) in &self.humidity_sensor {
            out.extend([*c, HUMIDITY_SENSOR, (v * 2.0).round().clamp(0.0, 255.0) as u8]);
        }
        for (c, v) in &self.accelerometer {
            out.extend([*c, ACCELEROMETER]);
            out.extend(scaled_xyz(v, 1000.0));
        }
        for (c, v) in &self.barometer {
            out.extend([*c, BAROMETER]);
            out.extend(((v * 10.0).round().clamp(0.0, f64::from(u16::MAX)) as u16).to_be_bytes());
        }
        for (c, v) in &self.gyrometer {
            out.extend([*c, GYROMETER]);
            out.extend(scaled_xyz(v, 100.0));
        }
        for (c, v) in &self.gps_location {
            out.extend([*c, GPS_LOCATION]);
            out.extend(scaled_i24(v.latitude, 10_000.0));
            out.extend(scaled_i24(v.longitude, 10_000.0));
            out.extend(scaled_i24(v.altitude, 100.0));
        }
        out
    }
}

struct Reader<'a> {
    b: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.b.len() - self.pos
    }

    fn take(&mut self, n: usize) -> ASResult<&[u8]> {
        if self.remaining() < n {
            return Err(ASError::Codec(format!(
                "Cayenne LPP payload truncated at byte {}",
                self.pos
            )));
        }
        let out = &self.b[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> ASResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> ASResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> ASResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i24(&mut self) -> ASResult<i32> {
        let b = self.take(3)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8)
    }

    fn xyz(&mut self, scale: f64) -> ASResult<Xyz> {
        Ok(Xyz {
            x: f64::from(self.i16()?) / scale,
            y: f64::from(self.i16()?) / scale,
            z: f64::from(self.i16()?) / scale,
        })
    }
}

fn scaled_i16(v: f64, scale: f64) -> [u8; 2] {
    ((v * scale).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16).to_be_bytes()
}

fn scaled_i24(v: f64, scale: f64) -> [u8; 3] {
    let v = (v * scale).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
    let b = v.to_be_bytes();
    [b[1], b[2], b[3]]
}

fn scaled_xyz(v: &Xyz, scale: f64) -> Vec<u8> {
    [v.x, v.y, v.z]
        .iter()
        .flat_map(|a| scaled_i16(*a, scale))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_mixed_payload_into_channel_maps() {
        // temperature 27.2 on ch 3, humidity 50% on ch 5, gps on ch 1
        let b = hex::decode("03670110056864018806765ff2960a0003e8").unwrap();
        let lpp = CayenneLpp::decode(&b).unwrap();
        assert_eq!(lpp.temperature_sensor[&3], 27.2);
        assert_eq!(lpp.humidity_sensor[&5], 50.0);
        let gps = lpp.gps_location[&1];
        assert_eq!(gps.latitude, 42.3519);
        assert_eq!(gps.longitude, -87.9094);
        assert_eq!(gps.altitude, 10.0);

        let v = serde_json::to_value(&lpp).unwrap();
        assert_eq!(v["temperatureSensor"]["3"], json!(27.2));
        assert!(v.get("digitalInput").is_none());
    }

    #[test]
    fn negative_values_survive_encoding() {
        let lpp: CayenneLpp = serde_json::from_value(json!({
            "temperatureSensor": {"2": -4.1},
            "accelerometer": {"6": {"x": 1.234, "y": -1.234, "z": 0.0}},
        }))
        .unwrap();
        let b = lpp.encode();
        assert_eq!(b[..4], [2, TEMPERATURE_SENSOR, 0xff, 0xd7]);
        assert_eq!(CayenneLpp::decode(&b).unwrap(), lpp);
    }

    #[test]
    fn rejects_unknown_type_and_truncation() {
        assert!(matches!(CayenneLpp::decode(&[1, 200, 0]), Err(ASError::Codec(_))));
        assert!(matches!(CayenneLpp::decode(&[1, TEMPERATURE_SENSOR, 0]), Err(ASError::Codec(_))));
    }
}
