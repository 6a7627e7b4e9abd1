//! Device factory (§4.1): builds the right `NetworkDevice` for an inventory
//! entry. Dispatch is purely on `DeviceConfig::device_type` — there is no
//! autodetection, since every fleet device is already typed in inventory.

use crate::device_connection::{DeviceConfig, DeviceType, NetworkDevice};
use crate::vendors::{BrocadeDevice, OpenWrtDevice, ZyxelCliDevice, ZyxelWebDevice};

pub struct DeviceFactory;

impl DeviceFactory {
    pub fn create_device(config: DeviceConfig) -> Box<dyn NetworkDevice> {
        match config.device_type {
            DeviceType::Brocade => Box::new(BrocadeDevice::new(config)),
            DeviceType::Onti | DeviceType::OpenWrt => Box::new(OpenWrtDevice::new(config)),
            DeviceType::Zyxel => Box::new(ZyxelWebDevice::new(config)),
            DeviceType::ZyxelCli => Box::new(ZyxelCliDevice::new(config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_onti_and_openwrt_to_the_same_driver() {
        let onti = DeviceConfig {
            device_type: DeviceType::Onti,
            ..Default::default()
        };
        let openwrt = DeviceConfig {
            device_type: DeviceType::OpenWrt,
            ..Default::default()
        };
        assert_eq!(DeviceFactory::create_device(onti).device_type(), DeviceType::Onti);
        assert_eq!(DeviceFactory::create_device(openwrt).device_type(), DeviceType::OpenWrt);
    }

    #[test]
    fn dispatches_brocade() {
        let config = DeviceConfig {
            device_type: DeviceType::Brocade,
            ..Default::default()
        };
        assert_eq!(DeviceFactory::create_device(config).device_type(), DeviceType::Brocade);
    }
}
