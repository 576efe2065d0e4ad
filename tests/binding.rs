#[cfg(test)]
mod tests {
    use bindery::{
        Argument, Bind, BindList, BindValue, Bindery, Customizer, Define, DirectiveSite, ErrorKind,
        FetchSize, MaxRows, Parameter, QueryTimeout, SqlObjectType, StatementContext,
        StatementTimeout, TypeDeclaration, Value, anyhow, args,
    };
    use bindery_tests::{MemoryDriver, init_logs};
    use indoc::indoc;
    use std::{sync::Arc, time::Duration};

    struct Users;
    impl SqlObjectType for Users {
        fn declare(users: &mut TypeDeclaration) {
            users.customize(BindValue::new("tenant", 42i64));
            users
                .method("by_position")
                .query("SELECT name FROM users WHERE age > ? AND city = ?")
                .param::<i32>("age")
                .param::<String>("city")
                .returns::<Vec<String>>();
            users
                .method("in_tenant")
                .query("SELECT name FROM users WHERE tenant = :tenant AND id = :id")
                .param::<i64>("id")
                .returns::<Option<String>>();
            users
                .method("by_ids")
                .query("SELECT name FROM users WHERE id IN (<ids>)")
                .param_with::<Vec<i64>>("ids", |ids| {
                    ids.customize(BindList::<i64>::new("ids"));
                })
                .returns::<Vec<String>>();
            users
                .method("sorted")
                .query("SELECT name FROM <table> ORDER BY <order>")
                .param_with::<&'static str>("table", |table| {
                    table.customize(Define::new("table"));
                })
                .customize(Define::constant("order", "name DESC"))
                .returns::<Vec<String>>();
            users
                .method("undefined")
                .query("SELECT name FROM <table>")
                .returns::<Vec<String>>();
            users
                .method("renamed")
                .update("UPDATE users SET name = :new_name WHERE id = :id")
                .param::<i64>("id")
                .param_with::<String>("name", |name| {
                    name.customize(Bind::new("new_name"));
                });
            users
                .method("with_extra")
                .query("SELECT name FROM users")
                .customize_as(
                    "extra",
                    |context: &mut StatementContext, _: Option<Parameter<'_>>| -> anyhow::Result<()> {
                        context.bind("limit", Value::Int32(Some(10)));
                        Ok(())
                    },
                )
                .returns::<Vec<String>>();
            users
                .method("missing")
                .query("SELECT name FROM users WHERE id = :identifier")
                .param::<i64>("id")
                .returns::<Option<String>>();
            users
                .method("rejected")
                .query("SELECT name FROM users")
                .customize_as(
                    "reject",
                    |_: &mut StatementContext, _: Option<Parameter<'_>>| -> anyhow::Result<()> {
                        Err(anyhow::Error::msg("the users table is locked"))
                    },
                )
                .returns::<Vec<String>>();
            users
                .method("slow")
                .query("SELECT pg_sleep(10)")
                .customize(QueryTimeout(Duration::from_millis(250)))
                .customize(FetchSize(64))
                .customize(MaxRows(1000))
                .customize_named("audited");
        }
    }

    fn bindery(driver: &MemoryDriver) -> Bindery {
        Bindery::builder(driver.clone())
            .register_customizer_factory(
                "audited",
                |site: &DirectiveSite<'_>| -> anyhow::Result<Arc<dyn Customizer>> {
                    let comment = format!("/* {site} */ ");
                    Ok(Arc::new(
                        move |context: &mut StatementContext,
                              _: Option<Parameter<'_>>|
                              -> anyhow::Result<()> {
                            context.define("audit", comment.clone());
                            Ok(())
                        },
                    ))
                },
            )
            .build()
    }

    #[test]
    fn default_bindings() {
        init_logs();
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        users
            .invoke::<Vec<String>>("by_position", args![30, "Turin".to_string()])
            .unwrap();
        users
            .invoke::<Option<String>>("in_tenant", args![7i64])
            .unwrap();
        let statements = driver.statements();
        assert_eq!(
            statements[0].values(),
            [Value::Int32(Some(30)), Value::Varchar(Some("Turin".into()))]
        );
        assert_eq!(
            statements[1].sql,
            "SELECT name FROM users WHERE tenant = ? AND id = ?"
        );
        assert_eq!(
            statements[1].values(),
            [Value::Int64(Some(42)), Value::Int64(Some(7))]
        );
    }

    #[test]
    fn templates() {
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        users
            .invoke::<Vec<String>>("by_ids", args![vec![3i64, 5, 8]])
            .unwrap();
        users
            .invoke::<Vec<String>>("sorted", args!["people"])
            .unwrap();
        let statements = driver.statements();
        assert_eq!(
            statements[0].sql,
            "SELECT name FROM users WHERE id IN (?, ?, ?)"
        );
        assert_eq!(
            statements[0].values(),
            [3, 5, 8].map(|v| Value::Int64(Some(v)))
        );
        assert_eq!(statements[1].sql, "SELECT name FROM people ORDER BY name DESC");

        let error = users
            .invoke::<Vec<String>>("by_ids", args![Vec::<i64>::new()])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Customization);
        let error = users
            .invoke::<Vec<String>>("undefined", args![])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert_eq!(driver.executed().len(), 2);
    }

    #[test]
    fn explicit_names() {
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        users
            .invoke::<()>("renamed", args![1i64, "Alan".to_string()])
            .unwrap();
        assert_eq!(
            driver.statements()[0].values(),
            [Value::Varchar(Some("Alan".into())), Value::Int64(Some(1))]
        );
        let error = users
            .invoke::<Option<String>>("missing", args![1i64])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert!(error.to_string().contains("identifier"), "{error}");
    }

    #[test]
    fn unused_bindings() {
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        let error = users
            .invoke::<Vec<String>>("with_extra", args![])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert!(error.to_string().contains("superfluous"), "{error}");
        assert!(driver.executed().is_empty());

        let lenient = Bindery::builder(driver.clone())
            .register_customizer_factory(
                "audited",
                |_: &DirectiveSite<'_>| -> anyhow::Result<Arc<dyn Customizer>> {
                    Ok(Arc::new(FetchSize(1)))
                },
            )
            .allow_unused_bindings(true)
            .build();
        lenient
            .on_demand::<Users>()
            .unwrap()
            .invoke::<Vec<String>>("with_extra", args![])
            .unwrap();
        assert_eq!(driver.executed(), ["SELECT name FROM users"]);
    }

    #[test]
    fn failing_customizer() {
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        let error = users
            .invoke::<Vec<String>>("rejected", args![])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Customization);
        assert!(driver.executed().is_empty());
        assert_eq!(driver.closes(), driver.opens());
    }

    #[test]
    fn sequence_outside_batch() {
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        let error = users
            .invoke::<Option<String>>("in_tenant", vec![Argument::list([1i64, 2])])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert_eq!(driver.opens(), 0);
    }

    #[test]
    fn arguments_must_match_declared_types() {
        let driver = MemoryDriver::new();
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        let error = users
            .invoke::<Option<String>>("in_tenant", args![String::from("not an i64")])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        let message = error.to_string();
        assert!(message.contains("`id` is declared as i64"), "{message}");
        assert!(message.contains("String"), "{message}");

        let error = users
            .invoke::<Vec<String>>("by_ids", args![vec![3i32, 5]])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        let error = users
            .invoke::<Option<String>>("in_tenant", vec![Argument::list(["1", "2"])])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert_eq!(driver.opens(), 0);
        assert!(driver.executed().is_empty());
    }

    #[test]
    fn statement_options_and_timeout() {
        let driver = MemoryDriver::new();
        driver.respond("pg_sleep", |statement| {
            Err(StatementTimeout(statement.timeout.unwrap_or_default()).into())
        });
        let users = bindery(&driver).on_demand::<Users>().unwrap();
        let error = users.invoke::<()>("slow", args![]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert!(error.is_timeout());
        let statements = driver.statements();
        let statement = &statements[0];
        assert_eq!(statement.timeout, Some(Duration::from_millis(250)));
        assert_eq!(statement.fetch_size, Some(64));
        assert_eq!(statement.max_rows, Some(1000));
    }

    struct Located;
    impl SqlObjectType for Located {
        fn declare(located: &mut TypeDeclaration) {
            located
                .method("find")
                .query("@find")
                .param::<i64>("id")
                .returns::<Option<String>>();
        }
    }

    #[test]
    fn located_sql() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::builder(driver.clone())
            .locator(
                |type_name: &str, method: &str, declared: &str| -> anyhow::Result<String> {
                    match declared.strip_prefix('@') {
                        Some(name) if name == method => Ok(indoc! {"
                            SELECT name
                            FROM users
                            WHERE id = :id"}
                        .to_string()),
                        _ => Err(anyhow::Error::msg(format!(
                            "No statement for {type_name}::{method}"
                        ))),
                    }
                },
            )
            .build();
        let located = bindery.on_demand::<Located>().unwrap();
        located
            .invoke::<Option<String>>("find", args![1i64])
            .unwrap();
        assert_eq!(
            driver.executed(),
            ["SELECT name\nFROM users\nWHERE id = ?"]
        );
        assert_eq!(
            bindery
                .descriptor::<Located>()
                .unwrap()
                .method("find")
                .unwrap()
                .operation()
                .sql(),
            Some("SELECT name\nFROM users\nWHERE id = :id")
        );
    }
}
