//! Terminal driver for auth prompts and the login flow.

use anyhow::{Context, Result, bail};
use dialoguer::{Input, Password, Select};
use hookwork_auth::{
    AuthOutcome, AuthRegistry, AuthStep, CallbackMode, Prompt, PromptInput, PromptPlan,
};

/// Ask one prompt on the terminal.
fn ask(prompt: &Prompt) -> Result<String> {
    match &prompt.input {
        PromptInput::Text { secret: true, .. } => Ok(Password::new()
            .with_prompt(&prompt.message)
            .interact()?),
        PromptInput::Text { placeholder, .. } => {
            let mut input = Input::<String>::new().with_prompt(&prompt.message);
            if let Some(placeholder) = placeholder {
                input = input.with_initial_text(placeholder);
            }
            Ok(input.interact_text()?)
        }
        PromptInput::Select { options } => {
            let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
            let choice = Select::new()
                .with_prompt(&prompt.message)
                .items(&labels)
                .default(0)
                .interact()?;
            Ok(options[choice].value.clone())
        }
    }
}

async fn pick_method(auth: &AuthRegistry, provider: &str) -> Result<usize> {
    let status = auth
        .list()
        .await
        .into_iter()
        .find(|s| s.provider == provider)
        .with_context(|| format!("Unknown auth provider: {provider}"))?;
    match status.methods.len() {
        0 => bail!("Provider {provider} has no auth methods"),
        1 => Ok(0),
        _ => {
            let labels: Vec<String> = status
                .methods
                .iter()
                .map(|(label, kind)| format!("{label} ({kind})"))
                .collect();
            Ok(Select::new()
                .with_prompt("Login method")
                .items(&labels)
                .default(0)
                .interact()?)
        }
    }
}

/// Run the interactive login for one provider.
pub async fn login(auth: &AuthRegistry, provider: &str, method: Option<usize>) -> Result<()> {
    let index = match method {
        Some(index) => index,
        None => pick_method(auth, provider).await?,
    };

    let prompts = auth.prompts(provider, index).await?;
    let answers = PromptPlan::new(&prompts).collect(ask)?;

    let outcome = match auth.authorize(provider, index, answers).await? {
        AuthStep::Done(outcome) => outcome,
        AuthStep::Pending {
            url,
            instructions,
            mode,
        } => {
            println!("Open this URL to authorize:\n\n  {url}\n");
            if !instructions.is_empty() {
                println!("{instructions}");
            }
            let code = match mode {
                CallbackMode::Code => Some(
                    Input::<String>::new()
                        .with_prompt("Paste the authorization code")
                        .interact_text()?,
                ),
                CallbackMode::Auto => {
                    println!("Waiting for the browser to finish...");
                    None
                }
            };
            auth.complete(provider, code).await?
        }
    };

    match outcome {
        AuthOutcome::Success(credential) => {
            println!("Logged in to {provider} ({})", credential.kind());
            Ok(())
        }
        AuthOutcome::Failed { reason } => bail!("Login to {provider} failed: {reason}"),
    }
}
