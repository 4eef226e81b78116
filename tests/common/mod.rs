use captains_log::*;
use rstest::*;
use std::fmt;
use std::future::Future;
use tokio::runtime::Runtime;

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

pub struct TestRunner {
    rt: Runtime,
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/chanbus_test.log", Level::Trace)
            .test()
            .build()
            .expect("log");
        Self {
            rt: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap(),
        }
    }

    pub fn block_on<F: Future<Output = ()>>(&self, f: F) {
        self.rt.block_on(f);
    }
}
