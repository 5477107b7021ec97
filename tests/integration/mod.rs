pub mod fixtures;

mod cred_flow_test;
mod dispatcher_test;
mod scenarios_test;
