#[cfg(test)]
mod tests {
    use bindery::{
        Argument, Bean, BindBean, Bindery, Error, ErrorKind, QueryResult, RowsAffected,
        SqlObjectType, TypeDeclaration, Value, anyhow,
    };
    use bindery_tests::{MemoryDriver, init_logs, rows_result};
    use rust_decimal::Decimal;
    use std::iter;

    #[derive(Bean, Default, Debug, Clone, PartialEq)]
    struct Product {
        id: i64,
        name: String,
        #[column_name("unit_price")]
        price: Decimal,
    }

    fn product(id: i64) -> Product {
        Product {
            id,
            name: format!("product {id}"),
            price: Decimal::new(id * 100 + 99, 2),
        }
    }

    struct Catalog;
    impl SqlObjectType for Catalog {
        fn declare(catalog: &mut TypeDeclaration) {
            catalog
                .method("insert_all")
                .batch("INSERT INTO products(id, name, unit_price) VALUES (:id, :name, :price)")
                .param_with::<Product>("product", |product| {
                    product.customize(BindBean::<Product>::new());
                })
                .chunk_size(2)
                .returns::<Vec<u64>>();
            catalog
                .method("insert_each")
                .batch("INSERT INTO products(id, name, unit_price) VALUES (:id, :name, :price)")
                .param_with::<Product>("product", |product| {
                    product.customize(BindBean::<Product>::new());
                })
                .transactional(false);
            catalog
                .method("tag")
                .batch("INSERT INTO tags(name, owner) VALUES (:name, :owner)")
                .param::<String>("name")
                .param::<i64>("owner")
                .param_with::<usize>("size", |size| {
                    size.chunk_size();
                })
                .returns::<Vec<u64>>();
            catalog
                .method("insert_names")
                .batch("INSERT INTO products(name) VALUES (:name)")
                .param::<String>("name")
                .get_generated_keys(["id"])
                .returns::<Vec<i64>>();
        }
    }

    fn products(ids: impl IntoIterator<Item = i64>) -> Argument {
        Argument::list(ids.into_iter().map(product).collect::<Vec<_>>())
    }

    fn names(values: &[&str]) -> Argument {
        Argument::list(values.iter().map(ToString::to_string).collect::<Vec<_>>())
    }

    #[test]
    fn executes_in_chunks() {
        init_logs();
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        let counts = catalog
            .invoke::<Vec<u64>>("insert_all", vec![products(1..=5)])
            .unwrap();
        assert_eq!(counts, [1, 1, 1, 1, 1]);

        let statements = driver.statements();
        assert_eq!(
            statements.iter().map(|v| v.parameters.len()).collect::<Vec<_>>(),
            [2, 2, 1]
        );
        assert_eq!(
            statements[0].sql,
            "INSERT INTO products(id, name, unit_price) VALUES (?, ?, ?)"
        );
        assert_eq!(
            statements[2].parameters[0],
            [
                Value::Int64(Some(5)),
                Value::Varchar(Some("product 5".into())),
                Value::Decimal(Some(Decimal::new(599, 2))),
            ]
        );
        assert_eq!(driver.begins(), 1);
        assert_eq!(driver.commits(), 1);
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn chunk_size_argument() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        let counts = catalog
            .invoke::<Vec<u64>>(
                "tag",
                vec![
                    names(&["a", "b", "c", "d"]),
                    Argument::new(7i64),
                    Argument::new(3usize),
                ],
            )
            .unwrap();
        assert_eq!(counts.len(), 4);
        let statements = driver.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[1].parameters,
            [[Value::Varchar(Some("d".into())), Value::Int64(Some(7))]]
        );
    }

    #[test]
    fn empty_batch() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        let error = catalog
            .invoke::<Vec<u64>>("insert_all", vec![products([])])
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        let error = catalog
            .invoke::<Vec<u64>>(
                "tag",
                vec![names(&["a"]), Argument::new(7i64), Argument::new(0usize)],
            )
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert_eq!(driver.opens(), 0);
        assert_eq!(driver.begins(), 0);
    }

    #[test]
    fn failing_chunk_is_reported() {
        let driver = MemoryDriver::new();
        driver.respond("INTO tags", |statement| {
            let bad = Value::Varchar(Some("bad".into()));
            if statement.parameters.iter().any(|v| v[0] == bad) {
                return Err(anyhow::Error::msg("value too long for column name"));
            }
            Ok(QueryResult::Batch(
                statement
                    .parameters
                    .iter()
                    .map(|_| RowsAffected {
                        rows_affected: 1,
                        last_affected_id: None,
                    })
                    .collect(),
            ))
        });
        let bindery = Bindery::new(driver.clone());
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        let error = catalog
            .invoke::<Vec<u64>>(
                "tag",
                vec![
                    names(&["a", "b", "c", "bad", "e"]),
                    Argument::new(1i64),
                    Argument::new(2usize),
                ],
            )
            .unwrap_err();
        assert!(
            matches!(error, Error::Execution { chunk: Some(1), .. }),
            "{error:?}"
        );
        assert_eq!(driver.executed().len(), 2);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
    }

    #[test]
    fn unbounded_sequences() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        let error = catalog
            .invoke::<()>(
                "insert_each",
                vec![Argument::iter(iter::repeat_with(|| product(1)))],
            )
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Binding);
        assert_eq!(driver.opens(), 0);

        let bindery = Bindery::builder(driver.clone())
            .default_chunk_size(10)
            .build();
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        catalog
            .invoke::<()>(
                "insert_each",
                vec![Argument::iter((1..).map(product).take_while(|v| v.id <= 25))],
            )
            .unwrap();
        assert_eq!(
            driver
                .statements()
                .iter()
                .map(|v| v.parameters.len())
                .collect::<Vec<_>>(),
            [10, 10, 5]
        );
        assert_eq!(driver.begins(), 0);
    }

    #[test]
    fn generated_keys() {
        let driver = MemoryDriver::new();
        driver.respond("INTO products(name)", |statement| {
            Ok(rows_result(
                ["id".to_string()].into(),
                (0..statement.parameters.len())
                    .map(|i| vec![Value::Int64(Some(100 + i as i64))])
                    .collect(),
            ))
        });
        let bindery = Bindery::new(driver.clone());
        let catalog = bindery.on_demand::<Catalog>().unwrap();
        let ids = catalog
            .invoke::<Vec<i64>>("insert_names", vec![names(&["x", "y", "z"])])
            .unwrap();
        assert_eq!(ids, [100, 101, 102]);
        assert_eq!(
            driver.statements()[0].generated_keys,
            Some(vec!["id".to_string()])
        );
    }
}
