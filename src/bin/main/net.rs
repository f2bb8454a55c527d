use embassy_net::Stack;
use embassy_time::{Duration as EmbassyDuration, WithTimeout};
use esp_radio::wifi::{PowerSaveMode, WifiController};
use log::{debug, info, warn};

const DHCP_TIMEOUT_SECS: u64 = 15;

// Fixed radio power policy: modem power save stays on to cap the radio's
// draw. The driver does not persist it across restarts, so it is reapplied
// on every attempt and never relaxed at runtime.
const RADIO_POWER_POLICY: PowerSaveMode = PowerSaveMode::Minimum;

/// One idempotent connectivity check-or-attempt. Already associated with an
/// address: true immediately. Otherwise a single start/connect/DHCP attempt;
/// the caller owns the retry loop and its fixed delay.
pub(super) async fn ensure_connected(
    controller: &mut WifiController<'_>,
    stack: Stack<'_>,
) -> bool {
    match controller.set_power_saving(RADIO_POWER_POLICY) {
        Ok(()) => debug!("radio power policy applied: {RADIO_POWER_POLICY:?}"),
        Err(err) => warn!("radio power policy not applied: {err:?}"),
    }

    if matches!(controller.is_connected(), Ok(true))
        && stack.is_link_up()
        && stack.config_v4().is_some()
    {
        return true;
    }

    info!("connecting to wifi: {}", super::WIFI_SSID);

    if !controller.is_started().unwrap_or(false) {
        if let Err(err) = controller.start_async().await {
            info!("wifi start failed: {err:?}");
            return false;
        }
    }

    if let Err(err) = controller.connect_async().await {
        info!("wifi connect failed: {err:?}");
        let _ = controller.disconnect_async().await;
        return false;
    }

    match stack
        .wait_config_up()
        .with_timeout(EmbassyDuration::from_secs(DHCP_TIMEOUT_SECS))
        .await
    {
        Ok(()) => {
            if let Some(config) = stack.config_v4() {
                info!(
                    "wifi connected: {} ip={}",
                    super::WIFI_SSID,
                    config.address.address()
                );
            }
            true
        }
        Err(_) => {
            info!("dhcp timeout; forcing reconnect");
            let _ = controller.disconnect_async().await;
            false
        }
    }
}
