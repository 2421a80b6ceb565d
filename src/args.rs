use argh::FromArgs;
use std::path::PathBuf;

#[derive(FromArgs, Debug, Default)]
/// Bridge one ANT+ heart rate monitor to a BLE Heart Rate Service peripheral
pub struct TopLevelCmd {
    /// specify config file path, creates file if it doesn't exist
    #[argh(option, short = 'c')]
    pub config_override: Option<PathBuf>,
    /// override the configured ANT+ device ID
    #[argh(option, short = 'd')]
    pub device_id: Option<u16>,
    /// bridge the built-in simulated sensor instead of real hardware
    #[argh(switch, short = 's')]
    pub simulate: bool,
}
