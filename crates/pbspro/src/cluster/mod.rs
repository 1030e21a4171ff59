pub mod external;

pub use external::ExternalClusterManager;
