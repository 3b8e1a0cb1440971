mod config_test;
mod policy_test;
