// mbpool collector - command line configuration
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Command line arguments and the settings derived from them.

use clap::Parser;
use mbpool::{
    parse_descriptors, CollectorConfig, ConfigError, ForwarderConfig, HttpTransportConfig,
    NightSchedule, RegisterSpec,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Register table used when none is given: a three-phase string inverter
/// (SUN2000 33/36/42KTL family).
pub const DEFAULT_REGISTERS: &str = "\
32290:2:active_power**:1000:I32:kW
32292:2:reactive_power**:1000:I32:kVar
32294:2:input_power**:1000:U32:kW
32298:2:ehour**:100:U32:kWh:1h:ehour
32345:2:ehour^p:100:U32:kWh:-1h:ehour
32300:2:eday**:100:U32:kWh:1d:eday
32349:2:eday^p:100:U32:kWh:-1d:eday
32302:2:emonth**:100:U32:kWh:1m:emonth
32353:2:emonth^p:100:U32:kWh:-1m:emonth
32304:2:eyear:100:U32:kWh:1y:eyear
32357:2:eyear^p:100:U32:kWh:-1y:eyear
32306:2:etotal**:100:U32:kWh:inf:etotal
32286:1:temp**:10:I16:C
32262:1:Upv1:10:I16:V
32263:1:Ipv1:10:I16:A
32264:1:Upv2:10:I16:V
32265:1:Ipv2:10:I16:A
32266:1:Upv3:10:I16:V
32267:1:Ipv3:10:I16:A
32268:1:Upv4:10:I16:V
32269:1:Ipv4:10:I16:A
32270:1:Upv5:10:I16:V
32271:1:Ipv5:10:I16:A
32272:1:Upv6:10:I16:V
32273:1:Ipv6:10:I16:A
32314:1:Upv7:10:I16:V
32315:1:Ipv7:10:I16:A
32316:1:Upv8:10:I16:V
32317:1:Ipv8:10:I16:A
32285:1:efficiency:100:U16:%
32322:1:ongrid**:1:U16:_
32323:1:iResistance:1000:U16:Mohm
33022:2:inP_MPPT1:1000:U32:kW
33024:2:inP_MPPT2:1000:U32:kW
33026:2:inP_MPPT3:1000:U32:kW
33070:2:inP_MPPT4:1000:U32:kW
32274:1:Uab:10:U16:V
32275:1:Ubc:10:U16:V
32276:1:Uca:10:U16:V
32277:1:Ua:10:U16:V
32278:1:Ub:10:U16:V
32279:1:Uc:10:U16:V
32280:1:Ia:10:U16:A
32281:1:Ib:10:U16:A
32282:1:Ic:10:U16:A
32283:1:freq:100:U16:Hz
32284:1:power_factor:1000:U16:_:none
32287:1:inv_status:1:U16:_:none
32288:2:peak_power**:1000:I32:kW
32319:1:s1:1:U16:_
32320:1:s2:1:U16:_
32321:1:s3:1:U16:_
";

/// Modbus field telemetry collector
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Modbus TCP device or gateway address
    #[arg(long, default_value = "127.0.0.1:502")]
    pub device: String,

    /// Modbus unit (slave) id
    #[arg(long, default_value_t = 15)]
    pub unit_id: u8,

    /// Max seconds to wait for a single read
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,

    /// File with register descriptors, one per line
    #[arg(long)]
    pub rfile: Option<PathBuf>,

    /// Register descriptors: address:words:name:gain:kind:unit[:bucket[:stream]]
    pub registers: Vec<String>,

    /// Sample once, print to stdout and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between reads
    #[arg(long, default_value_t = 10)]
    pub interval: u64,

    /// Remote write endpoint, e.g. http://localhost:8086/write?db=db0&u=user&p=pass
    #[arg(long, env = "MBPOOL_INFLUXDB")]
    pub influxdb: Option<String>,

    /// Tags written with every point
    #[arg(long, env = "MBPOOL_INFLUX_TAGS", default_value = "loc=1,type=1,inverter=ktl33")]
    pub influx_tags: String,

    /// Print the write requests instead of sending them
    #[arg(long)]
    pub influx_dry: bool,

    /// Accept invalid TLS certificates from the write endpoint
    #[arg(long)]
    pub insecure_tls: bool,

    /// Max pending batches kept while the endpoint is down
    #[arg(long, default_value_t = 120)]
    pub max_backlog: usize,

    /// Max write requests per cycle
    #[arg(long, default_value_t = 12)]
    pub max_flush: usize,

    /// Sleep during the night
    #[arg(long)]
    pub nightmode: bool,

    /// Night starts at (hour, local time)
    #[arg(long, default_value_t = 22)]
    pub nightmode_start: u32,

    /// Night ends at (hour, local time)
    #[arg(long, default_value_t = 5)]
    pub nightmode_end: u32,

    /// Seconds between checks whether the night has ended
    #[arg(long, default_value_t = 300)]
    pub nightmode_sleep: u64,

    /// Snapshot and metrics listen address
    #[arg(long, default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Check numeric settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::Invalid("--interval must be at least 1".into()));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("--timeout must be at least 1".into()));
        }
        if self.max_backlog == 0 || self.max_flush == 0 {
            return Err(ConfigError::Invalid(
                "--max-backlog and --max-flush must be at least 1".into(),
            ));
        }
        if self.nightmode_start > 23 || self.nightmode_end > 23 {
            return Err(ConfigError::Invalid("night mode hours must be 0-23".into()));
        }
        Ok(())
    }

    /// Register table: command line lines, then the file, else the default
    ///
    /// Both sources are parsed as one list, so either may be empty as long
    /// as the other is not.
    pub fn register_specs(&self) -> Result<Vec<RegisterSpec>, ConfigError> {
        if self.registers.is_empty() && self.rfile.is_none() {
            return parse_descriptors(DEFAULT_REGISTERS.lines());
        }

        let mut lines = self.registers.clone();
        if let Some(ref path) = self.rfile {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            lines.extend(content.lines().map(str::to_string));
        }
        parse_descriptors(lines.iter().map(String::as_str))
    }

    /// Per-read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Night suspension window, if enabled
    pub fn night_schedule(&self) -> Option<NightSchedule> {
        self.nightmode.then(|| NightSchedule {
            start_hour: self.nightmode_start,
            end_hour: self.nightmode_end,
            sleep: Duration::from_secs(self.nightmode_sleep),
        })
    }

    /// Sampling loop settings
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            once: self.once,
            interval: Duration::from_secs(self.interval),
            night: self.night_schedule(),
        }
    }

    /// Forwarding pipeline settings
    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            max_backlog: self.max_backlog,
            max_flush_per_cycle: self.max_flush,
            dry_run: self.influx_dry,
            tags: self.influx_tags.clone(),
        }
    }

    /// Write transport settings
    pub fn http_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            insecure_tls: self.insecure_tls,
            ..Default::default()
        }
    }
}
