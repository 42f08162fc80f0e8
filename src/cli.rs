use crate::config::RagdollConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

/// Arguments of the `ragdoll_check` tool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckArgs {
    pub config: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub skeleton: Option<PathBuf>,
    pub index: i64,
    pub steps: u32,
    pub dt: Option<f32>,
    pub sleep_threshold: Option<f32>,
    pub show_help: bool,
}

pub const DEFAULT_STEPS: u32 = 120;

impl CheckArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = CheckArgs { steps: DEFAULT_STEPS, ..CheckArgs::default() };
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if flag == "--help" || flag == "-h" {
                parsed.show_help = true;
                continue;
            }
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => parsed.config = Some(PathBuf::from(value)),
                "script" => parsed.script = Some(PathBuf::from(value)),
                "skeleton" => parsed.skeleton = Some(PathBuf::from(value)),
                "index" => {
                    parsed.index = value.parse::<i64>().with_context(|| format!("Invalid index '{value}'"))?;
                }
                "steps" => {
                    parsed.steps = value.parse::<u32>().with_context(|| format!("Invalid steps '{value}'"))?;
                }
                "dt" => {
                    let dt = value.parse::<f32>().with_context(|| format!("Invalid dt '{value}'"))?;
                    if !(dt > 0.0 && dt.is_finite()) {
                        bail!("dt must be a positive number, got {dt}");
                    }
                    parsed.dt = Some(dt);
                }
                "sleep-threshold" => {
                    parsed.sleep_threshold = Some(
                        value.parse::<f32>().with_context(|| format!("Invalid sleep threshold '{value}'"))?,
                    );
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --script, --skeleton, --index, --steps, --dt, --sleep-threshold."
                ),
            }
        }
        Ok(parsed)
    }

    pub fn config_overrides(&self) -> RagdollConfigOverrides {
        RagdollConfigOverrides { fixed_dt: self.dt, sleep_threshold: self.sleep_threshold }
    }
}
