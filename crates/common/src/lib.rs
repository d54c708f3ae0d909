// picedit-common: wire protocol and identifier types shared by the relay and its clients

pub mod protocol;
pub mod types;
