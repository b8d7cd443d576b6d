mod naming;
mod options;
mod package;
mod record;

pub use naming::{
    derive_name_from_filename, install_id_for, normalize_name, validate_identifier,
    version_from_filename, MAX_IDENTIFIER_LEN,
};
pub use options::InstallOptions;
pub use package::PackageType;
pub use record::{InstallMethod, InstallRecord, RecordMetadata, WaylandSupport};
