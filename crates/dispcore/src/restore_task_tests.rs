use super::*;

#[tokio::test]
async fn install_and_remove_are_callable_no_ops() {
    let registrar = NoopRestoreTaskRegistrar;
    registrar.install().await;
    registrar.remove().await;
}
