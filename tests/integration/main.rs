mod e2e_test;
mod hub_test;
mod pipeline_test;
