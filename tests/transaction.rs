#[cfg(test)]
mod tests {
    use bindery::{
        Argument, Bindery, Error, ErrorKind, Isolation, IsolationHint, Result, SqlObject,
        SqlObjectType, Transaction, TypeDeclaration, anyhow, args,
    };
    use bindery_tests::{Event, MemoryDriver, init_logs};

    struct Accounts;
    impl SqlObjectType for Accounts {
        fn declare(accounts: &mut TypeDeclaration) {
            accounts
                .method("deposit")
                .update("UPDATE accounts SET balance = balance + :amount WHERE id = :id")
                .param::<i64>("id")
                .param::<i64>("amount");
            accounts
                .method("withdraw")
                .update("UPDATE accounts SET balance = balance - :amount WHERE id = :id")
                .param::<i64>("id")
                .param::<i64>("amount")
                .decorate(Transaction::new());
            accounts
                .method("audit")
                .update("INSERT INTO audit(entry) VALUES (:entry)")
                .param::<String>("entry")
                .customize(IsolationHint(Isolation::Serializable));
            accounts
                .method("transfer")
                .param::<i64>("from")
                .param::<i64>("to")
                .param::<i64>("amount")
                .default_body::<Accounts, (), _>(|accounts, arguments| {
                    let [from, to, amount] = [0, 1, 2].map(|i| int(&arguments, i));
                    accounts.in_transaction(|accounts| {
                        accounts.withdraw(from, amount)?;
                        accounts.deposit(to, amount)
                    })
                });
        }
    }

    fn int(arguments: &[Argument], index: usize) -> i64 {
        *arguments[index].downcast_ref::<i64>().unwrap()
    }

    trait AccountQueries {
        fn deposit(&self, id: i64, amount: i64) -> Result<()>;
        fn withdraw(&self, id: i64, amount: i64) -> Result<()>;
        fn audit(&self, entry: &str) -> Result<()>;
        fn transfer(&self, from: i64, to: i64, amount: i64) -> Result<()>;
    }

    impl AccountQueries for SqlObject<Accounts> {
        fn deposit(&self, id: i64, amount: i64) -> Result<()> {
            self.invoke("deposit", args![id, amount])
        }
        fn withdraw(&self, id: i64, amount: i64) -> Result<()> {
            self.invoke("withdraw", args![id, amount])
        }
        fn audit(&self, entry: &str) -> Result<()> {
            self.invoke("audit", args![entry.to_string()])
        }
        fn transfer(&self, from: i64, to: i64, amount: i64) -> Result<()> {
            self.invoke("transfer", args![from, to, amount])
        }
    }

    fn refuse_withdrawals(driver: &MemoryDriver) {
        driver.respond("balance - ", |_| {
            Err(anyhow::Error::msg("insufficient funds"))
        });
    }

    #[test]
    fn nested_scopes_collapse() {
        init_logs();
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        bindery
            .in_transaction(|handle| {
                handle.in_transaction(|handle| {
                    assert_eq!(handle.transaction_depth(), 2);
                    handle.in_transaction(|_| Ok(()))
                })?;
                let accounts = bindery.attach::<Accounts>(handle)?;
                accounts.withdraw(1, 10)?;
                accounts.withdraw(2, 10)?;
                assert_eq!(handle.transaction_depth(), 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(driver.begins(), 1);
        assert_eq!(driver.commits(), 1);
        assert_eq!(driver.rollbacks(), 0);
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn failure_rolls_back() {
        let driver = MemoryDriver::new();
        refuse_withdrawals(&driver);
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        let error = accounts.withdraw(1, 500).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert!(error.suppressed().is_none());
        assert_eq!(driver.begins(), 1);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn failed_rollback_keeps_the_cause() {
        let driver = MemoryDriver::new();
        refuse_withdrawals(&driver);
        driver.fail_rollback(true);
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        let error = accounts.withdraw(1, 500).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transaction);
        assert!(matches!(
            &error,
            Error::Transaction { cause: Some(cause), .. } if cause.kind() == ErrorKind::Execution
        ));
    }

    #[test]
    fn object_transaction_shares_one_resource() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        accounts
            .in_transaction(|accounts| {
                accounts.deposit(1, 5)?;
                accounts.withdraw(1, 2)?;
                accounts.deposit(1, 1)
            })
            .unwrap();
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.begins(), 1);
        assert_eq!(driver.commits(), 1);
        assert_eq!(driver.closes(), 1);
        let events = driver.events();
        let Some(Event::Open(connection)) = events.first() else {
            panic!("The first event must open the connection: {events:?}");
        };
        assert!(events.iter().all(|v| match v {
            Event::Execute(id, _) => id == connection,
            _ => true,
        }));
    }

    #[test]
    fn default_body_transaction_rolls_back() {
        let driver = MemoryDriver::new();
        driver.respond("balance + ", |_| {
            Err(anyhow::Error::msg("account 2 is frozen"))
        });
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        let error = accounts.transfer(1, 2, 30).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert_eq!(driver.executed().len(), 2);
        assert_eq!(driver.begins(), 1);
        assert_eq!(driver.commits(), 0);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn isolation_hint() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        accounts.audit("opened").unwrap();
        assert!(driver.events().iter().any(|v| matches!(
            v,
            Event::Begin(_, Some(Isolation::Serializable), false)
        )));
        assert_eq!(driver.commits(), 1);

        driver.clear_events();
        let error = bindery
            .with_handle(|handle| {
                handle.transaction(Some(Isolation::ReadCommitted), false, |handle| {
                    bindery.attach::<Accounts>(handle)?.audit("joined")
                })
            })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transaction);
        assert!(driver.executed().is_empty());
        assert_eq!(driver.rollbacks(), 1);
    }

    #[test]
    fn close_with_open_transaction() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let handle = bindery.open().unwrap();
        handle.begin().unwrap();
        assert!(handle.is_in_transaction());
        let error = handle.close().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transaction);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.closes(), 1);
        assert!(handle.commit().is_err());
    }
    #[test]
    fn object_transaction_isolation() {
        let driver = MemoryDriver::new();
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        accounts
            .in_transaction_with(Isolation::Serializable, |accounts| {
                accounts.deposit(1, 5)?;
                accounts.audit("deposit")
            })
            .unwrap();
        assert_eq!(
            driver.events().iter().filter(|v| matches!(v, Event::Begin(..))).collect::<Vec<_>>(),
            [&Event::Begin(1, Some(Isolation::Serializable), false)]
        );
        assert_eq!(driver.commits(), 1);

        driver.clear_events();
        let error = accounts
            .in_transaction_with(Isolation::ReadCommitted, |accounts| {
                accounts.deposit(1, 5)?;
                accounts.audit("deposit")
            })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transaction);
        assert_eq!(driver.executed().len(), 1);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn close_failure_is_suppressed() {
        let driver = MemoryDriver::new();
        driver.fail_close(true);
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        let error = accounts.deposit(1, 5).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resource);
        assert!(error.suppressed().is_none());

        driver.respond("balance + ", |_| {
            Err(anyhow::Error::msg("account 1 is frozen"))
        });
        let error = accounts.deposit(1, 5).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert_eq!(error.primary().kind(), ErrorKind::Execution);
        assert_eq!(
            error.suppressed().map(Error::kind),
            Some(ErrorKind::Resource)
        );
        assert_eq!(driver.closes(), 2);
    }

    #[test]
    fn failed_open() {
        let driver = MemoryDriver::new();
        driver.fail_connect(true);
        let bindery = Bindery::new(driver.clone());
        let accounts = bindery.on_demand::<Accounts>().unwrap();
        let error = accounts.withdraw(1, 10).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resource);
        assert!(error.suppressed().is_none());
        let error = accounts.transfer(1, 2, 10).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resource);
        assert!(bindery.open().is_err());
        assert!(driver.events().is_empty());

        driver.fail_connect(false);
        accounts.withdraw(1, 10).unwrap();
        assert_eq!(driver.begins(), 1);
    }
}
