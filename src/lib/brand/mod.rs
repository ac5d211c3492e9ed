use async_trait::async_trait;

pub mod navico;

use crate::radar::RadarError;
use crate::radar::controls::ControlValue;

///
/// Every brand should be able to send commands to the radar using the CommandSender trait.
///
#[async_trait]
pub trait CommandSender: Send {
    ///
    /// Apply a control value to a specific control
    ///
    async fn set_control(&mut self, cv: &ControlValue) -> Result<(), RadarError>;

    ///
    /// Keep the radar transmitting and ask it to report its state
    ///
    async fn send_report_requests(&mut self) -> Result<(), RadarError>;
}
