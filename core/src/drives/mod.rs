// Disk inventory
//
// - filter.rs: protected set and ignore-prefix rules
// - probe.rs: rotational flag, size fallback chain, udev property lookup
// - detection.rs: lsblk inventory snapshots
// - registry.rs: authoritative name -> disk map and debounce table
// - hotplug.rs: udev event stream and the hotplug monitor

pub mod detection;
pub mod filter;
pub mod hotplug;
pub mod probe;
pub mod registry;


pub use detection::{parse_lsblk, DiskRecord, InventorySource, LsblkInventory};
pub use filter::DeviceFilter;
pub use hotplug::{DeviceAction, DeviceEvent, HotplugMonitor, UdevEventParser, UdevadmEventSource};
pub use probe::{DeviceProbe, SizeSource, SystemProbe};
pub use registry::{DiskRegistry, ScanDelta};
