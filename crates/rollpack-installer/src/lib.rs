mod error;
mod fetch;
mod fs_utils;
mod layout;
mod links;
mod store;

pub use error::StoreError;
pub use layout::{default_install_root, StoreLayout, EXPERIMENT_LINK, STABLE_LINK};
pub use links::PackageLinks;
pub use store::PackageStore;
