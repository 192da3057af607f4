//! Unit tests for the `armflow` CLI binary implementation.

use super::*;
use armflow::ProviderFuture;
use armflow::sample::{CloudProfile, SampleOptions};
use armflow::test_support::EnvGuard;
use rstest::{fixture, rstest};

async fn dispatch_with_hook<F, Fut>(hook: F) -> Result<i32, CliError>
where
    F: Fn(RunCommand) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<i32, CliError>> + Send + 'static,
{
    *RUN_COMMAND_HOOK.lock().await = Some(Box::new(move |cmd| Box::pin(hook(cmd))));
    let result = dispatch(Cli::Run(RunCommand { yes: true })).await;
    // Clear the hook after use to prevent interference with other tests
    *RUN_COMMAND_HOOK.lock().await = None;
    result
}

#[fixture]
fn stack() -> SampleStack {
    let options = SampleOptions {
        vm_name: String::from("cli"),
        unique_suffix: String::from("0123456789"),
        ..SampleOptions::new(CloudProfile::Public, "cli-group")
    };
    SampleStack::build(&options).expect("sample stack builds")
}

fn config() -> AzureConfig {
    AzureConfig {
        tenant_id: String::new(),
        client_id: String::new(),
        client_secret: String::new(),
        subscription_id: String::new(),
        endpoint: None,
        location: None,
        group_name: String::from("cli-group"),
        vm_name: String::from("cli"),
        storage_endpoint_suffix: None,
        ssh_public_key_path: String::from("/nonexistent/id_rsa.pub"),
        step_timeout_secs: 5,
        lifecycle_timeout_secs: 5,
        teardown_timeout_secs: 5,
        poll_interval_secs: 1,
    }
}

async fn run_with(
    provider: ScriptedProvider,
    stack: SampleStack,
    yes: bool,
    input: &str,
) -> (Result<i32, CliError>, String) {
    let mut reader = input.as_bytes();
    let mut out = Vec::new();
    let result = execute(
        provider,
        &config(),
        stack,
        &RunCommand { yes },
        &mut reader,
        &mut out,
    )
    .await;
    (result, String::from_utf8(out).expect("utf8 output"))
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn execute_walks_every_step(stack: SampleStack) {
    let provider = ScriptedProvider::new();
    let (result, output) = run_with(provider.clone(), stack, true, "").await;

    assert!(matches!(result, Ok(0)), "unexpected result: {result:?}");
    for step in ["[provision]", "[inventory]", "[export-template]", "[power-off]", "[start]"] {
        assert!(output.contains(step), "missing {step} in: {output}");
    }
    assert!(output.contains("[teardown] deleted resource group cli-group"), "{output}");
    assert!(!output.contains("Press Enter"), "--yes should skip prompts: {output}");
    assert_eq!(provider.delete_calls(), 1);
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn execute_prompts_before_disruptive_steps(stack: SampleStack) {
    let (result, output) = run_with(ScriptedProvider::new(), stack, false, "\n\n").await;

    assert!(matches!(result, Ok(0)), "unexpected result: {result:?}");
    assert_eq!(output.matches("Press Enter to").count(), 4, "{output}");
    assert!(output.contains("Press Enter to delete the resource group"));
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn execute_reports_password_login_without_key(stack: SampleStack) {
    let (_, output) = run_with(ScriptedProvider::new(), stack, true, "").await;
    assert!(
        output.contains("accepts password login for notAdmin"),
        "output: {output}"
    );
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn failed_step_tears_down_and_errors(stack: SampleStack) {
    let provider = ScriptedProvider::new();
    provider.fail_create("sample-nic-cli");

    let (result, output) = run_with(provider.clone(), stack, true, "").await;

    let err = result.expect_err("creation failure should surface");
    assert!(
        matches!(err, CliError::Workflow(ref message) if message.contains("sample-nic-cli")),
        "unexpected error: {err}"
    );
    assert!(!output.contains("[provision]"), "{output}");
    assert_eq!(provider.delete_calls(), 1, "abort should delete the group");
}

#[rstest]
#[case("ok")]
#[case("fail-create:sample-pip")]
#[case("fail-delete:2")]
#[tokio::test(flavor = "current_thread")]
async fn fake_provider_modes_are_recognised(#[case] mode: &str) {
    let _guard = EnvGuard::set_var(FAKE_PROVIDER_ENV, mode).await;
    let provider = fake_provider_from_env().expect("mode parses");
    assert!(provider.is_some());
}

#[rstest]
#[case("explode")]
#[case("fail-delete:many")]
#[tokio::test(flavor = "current_thread")]
async fn fake_provider_rejects_unknown_modes(#[case] mode: &str) {
    let _guard = EnvGuard::set_var(FAKE_PROVIDER_ENV, mode).await;
    let err = fake_provider_from_env().expect_err("mode should be rejected");
    assert!(matches!(err, CliError::Config(_)), "unexpected error: {err}");
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn fake_provider_absent_without_env() {
    let _guard = EnvGuard::remove_vars(&[FAKE_PROVIDER_ENV]).await;
    assert!(fake_provider_from_env().expect("no env").is_none());
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn run_command_requires_credentials() {
    let _guard = EnvGuard::remove_vars(&[
        FAKE_PROVIDER_ENV,
        "AZURE_TENANT_ID",
        "AZURE_CLIENT_ID",
        "AZURE_CLIENT_SECRET",
        "AZURE_SUBSCRIPTION_ID",
    ])
    .await;
    let err = run_command(&RunCommand { yes: true })
        .await
        .expect_err("missing credentials should fail");
    assert!(matches!(err, CliError::Config(_)), "unexpected error: {err}");
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn dispatch_uses_hook_result() {
    let result = dispatch_with_hook(|_| async { Ok(42) }).await;
    assert!(matches!(result, Ok(42)));
}

#[rstest]
fn build_stack_falls_back_to_password_login() {
    let built = build_stack(&config()).expect("stack builds without a key");
    assert!(built.password_login);
    assert_eq!(built.descriptors.len(), 6);
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    let err = CliError::Workflow(String::from("boom"));
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).expect("utf8");
    assert!(
        rendered.contains("workflow error: boom"),
        "rendered: {rendered}"
    );
}

struct Unreachable;

#[derive(Debug, thiserror::Error)]
#[error("unreachable provider")]
struct UnreachableError;

impl ProviderClient for Unreachable {
    type Error = UnreachableError;

    fn create_or_update<'a>(
        &'a self,
        _group: &'a str,
        _descriptor: &'a armflow::ResourceDescriptor,
    ) -> ProviderFuture<'a, armflow::LiveResource, Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }

    fn delete_group<'a>(&'a self, _group: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }

    fn list_resources<'a>(
        &'a self,
        _group: &'a str,
    ) -> ProviderFuture<'a, Vec<armflow::LiveResource>, Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }

    fn power_off<'a>(
        &'a self,
        _group: &'a str,
        _vm: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }

    fn start<'a>(&'a self, _group: &'a str, _vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }

    fn restart<'a>(&'a self, _group: &'a str, _vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }

    fn export_template<'a>(
        &'a self,
        _group: &'a str,
        _filter: &'a armflow::ResourceFilter,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async { Err(UnreachableError) })
    }
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn failed_cleanup_still_reports_the_original_error(stack: SampleStack) {
    let mut reader: &[u8] = b"";
    let mut out = Vec::new();
    let err = execute(
        Unreachable,
        &config(),
        stack,
        &RunCommand { yes: true },
        &mut reader,
        &mut out,
    )
    .await
    .expect_err("provider is unreachable");
    assert!(
        matches!(err, CliError::Workflow(ref message) if message.contains("unreachable provider")),
        "unexpected error: {err}"
    );
}
