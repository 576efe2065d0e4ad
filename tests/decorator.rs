#[cfg(test)]
mod tests {
    use bindery::{
        Around, Bindery, BinderyBuilder, Decorator, DirectiveSite, ErrorKind, Outcome,
        SqlObjectType, TypeDeclaration, anyhow, args, around,
    };
    use bindery_tests::{MemoryDriver, init_logs};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn tracer(label: &'static str, log: &Log) -> Around {
        let log = log.clone();
        around(label, move |inner, invocation| {
            log.lock().unwrap().push(format!("{label}>"));
            let result = inner.handle(invocation);
            log.lock().unwrap().push(format!("<{label}"));
            result
        })
    }

    fn traced(driver: &MemoryDriver, log: &Log) -> BinderyBuilder {
        let (outer, inner) = (log.clone(), log.clone());
        Bindery::builder(driver.clone())
            .decorate(tracer("global", log))
            .register_decorator_factory(
                "outer",
                move |_: &DirectiveSite<'_>| -> anyhow::Result<Arc<dyn Decorator>> {
                    Ok(Arc::new(tracer("outer", &outer)))
                },
            )
            .register_decorator_factory(
                "inner",
                move |site: &DirectiveSite<'_>| -> anyhow::Result<Arc<dyn Decorator>> {
                    if site.method.is_none() {
                        anyhow::bail!("`inner` only decorates methods");
                    }
                    Ok(Arc::new(tracer("inner", &inner)))
                },
            )
    }

    struct Traced;
    impl SqlObjectType for Traced {
        fn declare(traced: &mut TypeDeclaration) {
            traced.decorate_named("outer");
            traced
                .method("plain")
                .query("SELECT id FROM users")
                .decorate_named("inner")
                .returns::<Option<i64>>();
            traced
                .method("reversed")
                .query("SELECT id FROM users")
                .decorate_named("inner")
                .decorator_order(["inner", "outer", "global"])
                .returns::<Option<i64>>();
        }
    }

    #[test]
    fn first_declared_is_outermost() {
        init_logs();
        let driver = MemoryDriver::new();
        let log = Log::default();
        let bindery = traced(&driver, &log).build();
        let traced = bindery.on_demand::<Traced>().unwrap();
        assert_eq!(
            traced.descriptor().method("plain").unwrap().decorators(),
            ["global", "outer", "inner"]
        );
        traced.invoke::<Option<i64>>("plain", args![]).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["global>", "outer>", "inner>", "<inner", "<outer", "<global"]
        );
        assert_eq!(driver.executed().len(), 1);
    }

    #[test]
    fn explicit_order() {
        let driver = MemoryDriver::new();
        let log = Log::default();
        let bindery = traced(&driver, &log).build();
        let traced = bindery.on_demand::<Traced>().unwrap();
        traced.invoke::<Option<i64>>("reversed", args![]).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["inner>", "outer>", "global>", "<global", "<outer", "<inner"]
        );
    }

    #[test]
    fn global_order() {
        let driver = MemoryDriver::new();
        let log = Log::default();
        let bindery = traced(&driver, &log)
            .decorator_order(["outer"])
            .build();
        let traced = bindery.on_demand::<Traced>().unwrap();
        assert_eq!(
            traced.descriptor().method("plain").unwrap().decorators(),
            ["outer", "global", "inner"]
        );
        assert_eq!(
            traced.descriptor().method("reversed").unwrap().decorators(),
            ["inner", "outer", "global"]
        );
    }

    struct Misplaced;
    impl SqlObjectType for Misplaced {
        fn declare(misplaced: &mut TypeDeclaration) {
            misplaced.decorate_named("inner");
            misplaced.method("plain").query("SELECT id FROM users");
        }
    }

    struct Unknown;
    impl SqlObjectType for Unknown {
        fn declare(unknown: &mut TypeDeclaration) {
            unknown
                .method("plain")
                .query("SELECT id FROM users")
                .decorate_named("missing");
        }
    }

    #[test]
    fn factory_failures() {
        let driver = MemoryDriver::new();
        let bindery = traced(&driver, &Log::default()).build();
        let error = bindery.on_demand::<Misplaced>().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("only decorates methods"), "{error}");
        let error = bindery.on_demand::<Unknown>().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("Unknown::plain"), "{error}");
    }

    struct Cached;
    impl SqlObjectType for Cached {
        fn declare(cached: &mut TypeDeclaration) {
            cached
                .method("count")
                .query("SELECT COUNT(*) FROM users")
                .decorate(around("cache", |_, _| Ok(Box::new(42i64) as Outcome)))
                .returns::<i64>();
            cached
                .method("broken")
                .query("SELECT COUNT(*) FROM users")
                .decorate(around("wrong", |_, _| Ok(Box::new("42") as Outcome)))
                .returns::<i64>();
            cached
                .method("guarded")
                .query("DELETE FROM users")
                .decorate(around("guard", |inner, invocation| {
                    if invocation.method().name() == "guarded" {
                        return Err(bindery::Error::transaction("read only session"));
                    }
                    inner.handle(invocation)
                }));
        }
    }

    #[test]
    fn short_circuit() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let cached = bindery.on_demand::<Cached>().unwrap();
        assert_eq!(cached.invoke::<i64>("count", args![]).unwrap(), 42);
        let error = cached.invoke::<i64>("broken", args![]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Mapping);
        let error = cached.invoke::<()>("guarded", args![]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transaction);
        assert_eq!(driver.opens(), 0);
        assert!(driver.executed().is_empty());
    }
}
