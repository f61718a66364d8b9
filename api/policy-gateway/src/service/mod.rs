pub mod auth_service;
pub mod canonical_json_service;
pub mod chain_service;
pub mod events_service;
pub mod hash_service;
pub mod metrics_service;
pub mod policy_engine_service;
pub mod policy_parser_service;
pub mod retention_service;
