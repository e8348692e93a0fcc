pub mod agent;
pub mod credentials;
pub mod ingest;
pub mod realtime;
pub mod socket;
