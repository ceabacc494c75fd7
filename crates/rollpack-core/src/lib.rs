mod catalog;
mod names;
mod protocol;
mod status;
mod units;

pub use catalog::{Catalog, CatalogEntry, CatalogPayload};
pub use names::{validate_package_name, validate_version};
pub use protocol::{ControlRequest, ControlResponse};
pub use status::{PackageState, PackageStatus, StatusSnapshot};
pub use units::{experiment_unit_name, UnitSet, EXPERIMENT_UNIT_SUFFIX};
