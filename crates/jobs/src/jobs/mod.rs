mod review_pr;

pub use review_pr::process_review_job;
