mod admin_test;
mod discovery_test;
mod gateway_test;
