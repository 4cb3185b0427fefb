// tempest_exporter - Prometheus metrics from WeatherFlow Tempest weather stations
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::metrics::{
    Observation, BATTERY, BUS_ERRORS, HUMIDITY, ILLUMINANCE, IRRADIANCE, PRESSURE, RAIN_RATE, REBOOTS,
    REPORT_INTERVAL, RSSI, TEMPERATURE, UPTIME, UV, WIND, WIND_DIRECTION,
};
use crate::report::{HubStatusReport, ObservationReport, RapidWindReport, Report};
use crate::wetbulb::wet_bulb_temperature;

const RAPID_WIND_LEN: usize = 3;
const MIN_OBSERVATION_LEN: usize = 13;
const BATTERY_LEN: usize = 17;
const REPORT_INTERVAL_LEN: usize = 18;

/// Derive metrics from a report using the default settings.
///
/// See `Deriver::derive` for details.
pub fn derive_metrics(report: &Report) -> Vec<Observation> {
    Deriver::default().derive(report)
}

/// Converts reports into timestamped metric observations.
///
/// Derivation never fails: reports with values missing or the wrong length result
/// in fewer observations instead of an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct Deriver {
    wet_bulb: bool,
}

impl Deriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a wet-bulb temperature computed from each station observation, in
    /// addition to the air temperature.
    pub fn with_wet_bulb(mut self, wet_bulb: bool) -> Self {
        self.wet_bulb = wet_bulb;
        self
    }

    /// Return zero or more observations for the report, all with an `instance` label
    /// set to the serial number of the device that made the report.
    ///
    /// # Panics
    ///
    /// If wet-bulb temperatures are enabled and the calculation fails to converge for
    /// a station observation, this method will panic.
    pub fn derive(&self, report: &Report) -> Vec<Observation> {
        match report {
            Report::RapidWind(r) => self.rapid_wind(r),
            Report::StationObservation(r) => self.station_observation(r),
            Report::HubStatus(r) => self.hub_status(r),
            // TODO(56quarters): Lightning strike and rain start events
            Report::RainStart(_) | Report::LightningStrike(_) | Report::DeviceStatus(_) => Vec::new(),
        }
    }

    fn rapid_wind(&self, r: &RapidWindReport) -> Vec<Observation> {
        if r.ob.len() != RAPID_WIND_LEN {
            return Vec::new();
        }

        let sn = &r.serial_number;
        let ts = r.ob[0] as i64;
        vec![
            Observation::new(&WIND, sn, r.ob[1], ts).with_kind("rapid"),
            Observation::new(&WIND_DIRECTION, sn, r.ob[2], ts),
        ]
    }

    fn station_observation(&self, r: &ObservationReport) -> Vec<Observation> {
        let sn = &r.serial_number;
        let mut out = Vec::new();

        for ob in r.obs.iter().filter(|ob| ob.len() >= MIN_OBSERVATION_LEN) {
            let ts = ob[0] as i64;

            out.push(Observation::new(&WIND, sn, ob[1], ts).with_kind("lull"));
            out.push(Observation::new(&WIND, sn, ob[2], ts).with_kind("avg"));
            out.push(Observation::new(&WIND, sn, ob[3], ts).with_kind("gust"));
            out.push(Observation::new(&WIND_DIRECTION, sn, ob[4], ts));
            // millibar to pascal
            out.push(Observation::new(&PRESSURE, sn, ob[6] * 100.0, ts));
            out.push(Observation::new(&TEMPERATURE, sn, ob[7], ts).with_kind("air"));

            if self.wet_bulb {
                let wet_bulb = wet_bulb_temperature(ob[7], ob[8], ob[6]).unwrap_or_else(|e| panic!("{}", e));
                out.push(Observation::new(&TEMPERATURE, sn, wet_bulb, ts).with_kind("wetbulb"));
            }

            out.push(Observation::new(&HUMIDITY, sn, ob[8], ts));
            out.push(Observation::new(&ILLUMINANCE, sn, ob[9], ts));
            out.push(Observation::new(&UV, sn, ob[10], ts));
            out.push(Observation::new(&IRRADIANCE, sn, ob[11], ts));
            out.push(Observation::new(&RAIN_RATE, sn, ob[12], ts));

            // Trailing values may be missing independently of each other
            if ob.len() >= BATTERY_LEN {
                out.push(Observation::new(&BATTERY, sn, ob[16], ts));
            }
            if ob.len() >= REPORT_INTERVAL_LEN {
                // minutes to seconds
                out.push(Observation::new(&REPORT_INTERVAL, sn, ob[17] * 60.0, ts));
            }
        }

        out
    }

    fn hub_status(&self, r: &HubStatusReport) -> Vec<Observation> {
        let sn = &r.serial_number;
        let ts = r.timestamp;
        let mut out = vec![
            Observation::new(&UPTIME, sn, r.uptime, ts),
            Observation::new(&RSSI, sn, r.rssi, ts),
        ];

        if let Some(reboots) = r.radio_stats.get(1) {
            out.push(Observation::new(&REBOOTS, sn, *reboots, ts));
        }
        if let Some(errors) = r.radio_stats.get(2) {
            out.push(Observation::new(&BUS_ERRORS, sn, *errors, ts));
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::{derive_metrics, Deriver};
    use crate::metrics::{
        MetricDef, Observation, BATTERY, BUS_ERRORS, HUMIDITY, ILLUMINANCE, IRRADIANCE, PRESSURE, RAIN_RATE,
        REBOOTS, REPORT_INTERVAL, RSSI, TEMPERATURE, UPTIME, UV, WIND, WIND_DIRECTION,
    };
    use crate::report::{parse_report, ObservationReport, RapidWindReport, Report};

    const OBSERVATION: &[u8] = br#"{"serial_number":"ST-00019709","type":"obs_st","hub_sn":"HB-00031344","obs":[[1688668741,0.00,0.49,1.44,163,3,987.81,19.00,67.63,57687,4.38,480,0.000000,0,0,0,2.792,1]],"firmware_revision":156}"#;

    /// Assert that each observation matches the expected definition, value, and kind label
    /// and that all have the same instance and timestamp.
    fn assert_observations(
        expected: &[(&MetricDef, f64, Option<&str>)],
        instance: &str,
        timestamp: i64,
        got: &[Observation],
    ) {
        let got_names: Vec<&str> = got.iter().map(|o| o.name()).collect();
        let expected_names: Vec<&str> = expected.iter().map(|(d, _, _)| d.name).collect();
        assert_eq!(expected_names, got_names);

        for ((_, value, kind), o) in expected.iter().zip(got.iter()) {
            assert_eq!(*value, o.value, "{}", o.name());
            assert_eq!(*kind, o.label("kind"), "{}", o.name());
            assert_eq!(Some(instance), o.label("instance"), "{}", o.name());
            assert_eq!(timestamp, o.timestamp, "{}", o.name());
        }
    }

    fn observation_report(rows: Vec<Vec<f64>>) -> Report {
        Report::StationObservation(ObservationReport {
            serial_number: "ST-00019709".to_owned(),
            obs: rows,
            ..Default::default()
        })
    }

    #[test]
    fn test_derive_rapid_wind() {
        let report = parse_report(
            br#"{"serial_number":"ST-00019709","type":"rapid_wind","hub_sn":"HB-00031344","ob":[1688668572,0.85,113]}"#,
        )
        .unwrap();

        assert_observations(
            &[(&WIND, 0.85, Some("rapid")), (&WIND_DIRECTION, 113.0, None)],
            "ST-00019709",
            1688668572,
            &derive_metrics(&report),
        );
    }

    #[test]
    fn test_derive_rapid_wind_wrong_length() {
        let report = Report::RapidWind(RapidWindReport {
            serial_number: "ST-00019709".to_owned(),
            hub_sn: "HB-00031344".to_owned(),
            ob: vec![1688668572.0, 0.85],
        });

        assert!(derive_metrics(&report).is_empty());
    }

    #[test]
    fn test_derive_station_observation() {
        let report = parse_report(OBSERVATION).unwrap();

        assert_observations(
            &[
                (&WIND, 0.0, Some("lull")),
                (&WIND, 0.49, Some("avg")),
                (&WIND, 1.44, Some("gust")),
                (&WIND_DIRECTION, 163.0, None),
                (&PRESSURE, 98781.0, None),
                (&TEMPERATURE, 19.0, Some("air")),
                (&HUMIDITY, 67.63, None),
                (&ILLUMINANCE, 57687.0, None),
                (&UV, 4.38, None),
                (&IRRADIANCE, 480.0, None),
                (&RAIN_RATE, 0.0, None),
                (&BATTERY, 2.792, None),
                (&REPORT_INTERVAL, 60.0, None),
            ],
            "ST-00019709",
            1688668741,
            &derive_metrics(&report),
        );
    }

    #[test]
    fn test_derive_station_observation_short_rows() {
        let report = observation_report(vec![
            vec![1688668741.0, 0.0, 0.49, 1.44, 163.0, 3.0],
            vec![],
            vec![1688668741.0; 12],
        ]);

        assert!(derive_metrics(&report).is_empty());
    }

    #[test]
    fn test_derive_station_observation_trailing_values() {
        let base = vec![
            1688668741.0,
            0.0,
            0.49,
            1.44,
            163.0,
            3.0,
            987.81,
            19.0,
            67.63,
            57687.0,
            4.38,
            480.0,
            0.0,
        ];

        let mut with_battery = base.clone();
        with_battery.extend_from_slice(&[0.0, 0.0, 0.0, 2.792]);
        let mut with_interval = with_battery.clone();
        with_interval.push(1.0);

        let base_metrics = derive_metrics(&observation_report(vec![base]));
        assert_eq!(11, base_metrics.len());
        assert!(base_metrics.iter().all(|o| o.def != &BATTERY && o.def != &REPORT_INTERVAL));

        let battery_metrics = derive_metrics(&observation_report(vec![with_battery]));
        assert_eq!(12, battery_metrics.len());
        assert_eq!("tempest_battery_volts", battery_metrics[11].name());

        let interval_metrics = derive_metrics(&observation_report(vec![with_interval]));
        assert_eq!(13, interval_metrics.len());
        assert_eq!("tempest_report_interval_s", interval_metrics[12].name());
        assert_eq!(60.0, interval_metrics[12].value);
    }

    #[test]
    fn test_derive_station_observation_multiple_rows() {
        let report = observation_report(vec![
            vec![1688668741.0, 0.0, 0.49, 1.44, 163.0, 3.0, 987.81, 19.0, 67.63, 57687.0, 4.38, 480.0, 0.0],
            vec![1688668801.0, 0.0, 0.52, 1.50, 170.0, 3.0, 987.90, 19.1, 67.00, 57000.0, 4.40, 478.0, 0.0],
        ]);

        let metrics = derive_metrics(&report);
        assert_eq!(22, metrics.len());
        assert!(metrics[..11].iter().all(|o| o.timestamp == 1688668741));
        assert!(metrics[11..].iter().all(|o| o.timestamp == 1688668801));
    }

    #[test]
    fn test_derive_station_observation_wet_bulb() {
        let report = observation_report(vec![vec![
            1688668741.0,
            0.0,
            0.49,
            1.44,
            163.0,
            3.0,
            900.0,
            25.0,
            50.0,
            57687.0,
            4.38,
            480.0,
            0.0,
        ]]);

        let metrics = Deriver::new().with_wet_bulb(true).derive(&report);
        assert_eq!(12, metrics.len());

        assert_eq!("tempest_temperature_c", metrics[5].name());
        assert_eq!(Some("air"), metrics[5].label("kind"));
        assert_eq!("tempest_temperature_c", metrics[6].name());
        assert_eq!(Some("wetbulb"), metrics[6].label("kind"));
        assert!((metrics[6].value - 17.71).abs() <= 0.01);
        assert_eq!("tempest_humidity_percent", metrics[7].name());
    }

    #[test]
    fn test_derive_hub_status() {
        let report = parse_report(
            br#"{"serial_number":"HB-00031344","type":"hub_status","firmware_revision":"171","uptime":64275,"rssi":-44,"timestamp":1688666650,"reset_flags":"BOR,PIN,POR","seq":6419,"fs":[1,0,15675411,524288],"radio_stats":[25,1,0,3,16344],"mqtt_stats":[1,4]}"#,
        )
        .unwrap();

        assert_observations(
            &[
                (&UPTIME, 64275.0, None),
                (&RSSI, -44.0, None),
                (&REBOOTS, 1.0, None),
                (&BUS_ERRORS, 0.0, None),
            ],
            "HB-00031344",
            1688666650,
            &derive_metrics(&report),
        );
    }

    #[test]
    fn test_derive_hub_status_short_radio_stats() {
        let report = parse_report(
            br#"{"serial_number":"HB-00031344","type":"hub_status","uptime":64275,"rssi":-44,"timestamp":1688666650,"radio_stats":[25,1]}"#,
        )
        .unwrap();

        assert_observations(
            &[(&UPTIME, 64275.0, None), (&RSSI, -44.0, None), (&REBOOTS, 1.0, None)],
            "HB-00031344",
            1688666650,
            &derive_metrics(&report),
        );
    }

    #[test]
    fn test_derive_hub_status_null_radio_stats() {
        let report = parse_report(
            br#"{"serial_number":"HB-00031344","type":"hub_status","uptime":64275,"rssi":-44,"timestamp":1688666650,"radio_stats":null}"#,
        )
        .unwrap();

        assert_observations(
            &[(&UPTIME, 64275.0, None), (&RSSI, -44.0, None)],
            "HB-00031344",
            1688666650,
            &derive_metrics(&report),
        );
    }

    #[test]
    fn test_derive_station_observation_null_rows() {
        let empty = parse_report(br#"{"device_id":123456,"type":"obs_st","obs":null}"#).unwrap();
        assert!(derive_metrics(&empty).is_empty());

        let report = parse_report(
            br#"{"serial_number":"ST-00019709","type":"obs_st","obs":[null,[1688668741,0.00,0.49,1.44,163,3,987.81,19.00,67.63,57687,4.38,480,0.000000]]}"#,
        )
        .unwrap();
        assert_eq!(11, derive_metrics(&report).len());
    }

    #[test]
    fn test_derive_reserved_reports() {
        for payload in [
            r#"{"serial_number":"ST-00019709","type":"evt_precip","hub_sn":"HB-00031344","evt":[1493322445]}"#,
            r#"{"serial_number":"ST-00019709","type":"evt_strike","hub_sn":"HB-00031344","evt":[1493322445,27,3848]}"#,
            r#"{"serial_number":"ST-00019709","type":"device_status","hub_sn":"HB-00031344","timestamp":1688666521,"uptime":63807156,"voltage":2.792,"firmware_revision":156,"rssi":-82,"hub_rssi":-78,"sensor_status":0,"debug":0}"#,
        ] {
            let report = parse_report(payload.as_bytes()).unwrap();
            assert!(derive_metrics(&report).is_empty(), "{}", payload);
        }
    }

    #[test]
    fn test_derive_deterministic() {
        let report = parse_report(OBSERVATION).unwrap();
        assert_eq!(derive_metrics(&report), derive_metrics(&report));
    }
}
