mod master_service;

pub use master_service::MasterService;
