pub mod brocade;
pub mod openwrt;
pub mod zyxel;
pub mod zyxel_cli;

pub use brocade::BrocadeDevice;
pub use openwrt::OpenWrtDevice;
pub use zyxel::ZyxelWebDevice;
pub use zyxel_cli::ZyxelCliDevice;
