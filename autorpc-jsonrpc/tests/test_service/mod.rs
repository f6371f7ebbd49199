//! Test services built on the dispatch core.  Their behavior matches what the cases in the
//! `testdata/` folder expect, so they can be used to exercise the whole request path end-to-end.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use autorpc_jsonrpc::{MethodError, MethodResult, Methods, Registry, Service, typed_record};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// Integer arithmetic, plus methods that fail in each of the ways a method can fail.
#[derive(Debug, Default)]
pub struct MathService {
    calls: AtomicI64,
}

impl MathService {
    fn add(&self, a: i64, b: i64) -> MethodResult<i64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(a + b)
    }

    fn divide(&self, a: i64, b: i64) -> MethodResult<i64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if b == 0 {
            return Err(MethodError::new("division by zero"));
        }
        Ok(a / b)
    }

    fn sum(&self, values: Vec<i64>) -> MethodResult<i64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(values.iter().sum())
    }

    fn total(&self, prices: Vec<Decimal>) -> MethodResult<Decimal> {
        Ok(prices.into_iter().sum())
    }

    fn explode(&self) -> MethodResult<i64> {
        panic!("the math broke");
    }

    /// Returns a float with no JSON representation
    fn undefined(&self) -> MethodResult<f64> {
        Ok(f64::NAN)
    }

    fn calls(&self) -> MethodResult<i64> {
        Ok(self.calls.load(Ordering::Relaxed))
    }
}

impl Service for MathService {
    fn methods(methods: &mut Methods<Self>) {
        methods.method("add", &["a", "b"], Self::add).doc("Add two integers");
        methods.method("divide", &["a", "b"], Self::divide).doc("Integer division");
        methods.method("sum", &["values"], Self::sum);
        methods.method("total", &["prices"], Self::total);
        methods.method("explode", &[], Self::explode);
        methods.method("undefined", &[], Self::undefined);
        methods.method("calls", &[], Self::calls);
    }

    fn documentation() -> String {
        "Integer arithmetic".into()
    }
}

typed_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct UserData {
        pub username: String,
        pub lastlogin: NaiveDateTime,
    }
}

typed_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Reminder {
        pub text: String,
        pub priority: Option<i64>,
    }
}

/// Methods that take and return records.
#[derive(Debug)]
pub struct SampleService {
    pub greeting: String,
}

impl Default for SampleService {
    fn default() -> Self {
        Self {
            greeting: "Hello".into(),
        }
    }
}

impl SampleService {
    fn say_hello(&self, user: UserData) -> MethodResult<String> {
        Ok(format!(
            "{} {}, last seen {}",
            self.greeting,
            user.username,
            user.lastlogin.format("%Y-%m-%d")
        ))
    }

    fn get_user(&self, username: String, lastlogin: NaiveDateTime) -> MethodResult<UserData> {
        Ok(UserData { username, lastlogin })
    }

    fn last_login(&self, users: Vec<UserData>) -> MethodResult<Option<NaiveDateTime>> {
        Ok(users.into_iter().map(|user| user.lastlogin).max())
    }

    fn remind(&self, reminder: Reminder) -> MethodResult<String> {
        Ok(match reminder.priority {
            Some(priority) => format!("{} (priority {})", reminder.text, priority),
            None => reminder.text,
        })
    }

    fn echo_reminder(&self, reminder: Reminder) -> MethodResult<Reminder> {
        Ok(reminder)
    }
}

impl Service for SampleService {
    fn methods(methods: &mut Methods<Self>) {
        methods.method("say_hello", &["user"], Self::say_hello);
        methods.method("get_user", &["username", "lastlogin"], Self::get_user);
        methods.method("last_login", &["users"], Self::last_login);
        methods.method("remind", &["reminder"], Self::remind);
        methods.method("echo_reminder", &["reminder"], Self::echo_reminder);
    }
}

/// A registry with both test services registered under their default names.
pub fn test_registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register_service(MathService::default()).unwrap();
    registry.register_service(SampleService::default()).unwrap();
    Arc::new(registry)
}
