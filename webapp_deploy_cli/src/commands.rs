use std::path::{Path, PathBuf};

use anyhow::Context;
use aws_cfn_stack::{runtime, Stack};
use tracing::info;
use webapp_deploy::{DeployConfigFile, WebappDeploy};

/// the stack described by `config`, with its webapp deployment declared.
pub fn declare(config: &DeployConfigFile) -> anyhow::Result<(Stack, WebappDeploy)> {
    let mut stack = config.new_stack()?;
    let props = config.into_props()?;
    let root = stack.root();
    let webapp = WebappDeploy::new(&mut stack, root, &config.deployment.id, props)
        .with_context(|| format!("Failed to declare {} in stack {}", config.deployment.id, config.stack.name))?;
    Ok((stack, webapp))
}

/// writes `<out_dir>/<stack>.template.json` and returns its path.
pub fn write_template(config: &DeployConfigFile, stack: &Stack) -> anyhow::Result<PathBuf> {
    let body = stack.to_template_json()?;
    let out_dir = config.out_dir();
    std::fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;
    let path = out_dir.join(format!("{}.template.json", stack.name()));
    std::fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}

pub fn synth(config_path: &Path, stdout: bool) -> anyhow::Result<()> {
    let config = DeployConfigFile::load(config_path)?;
    let (stack, webapp) = declare(&config)?;
    if stdout {
        println!("{}", stack.to_template_json()?);
        return Ok(());
    }
    let path = write_template(&config, &stack)?;
    info!(
        template = %path.display(),
        assets = stack.assets().len(),
        deploys_on_update = webapp.invocation().is_some(),
        "synthesized stack"
    );
    Ok(())
}

pub async fn deploy(config_path: &Path) -> anyhow::Result<()> {
    let config = DeployConfigFile::load(config_path)?;
    let (stack, _) = declare(&config)?;
    write_template(&config, &stack)?;
    let outputs = runtime::apply(&stack)
        .await
        .with_context(|| format!("Failed to deploy stack {}", stack.name()))?;
    let mut keys: Vec<&String> = outputs.keys().collect();
    keys.sort();
    for key in keys {
        println!("{key} = {}", outputs[key]);
    }
    Ok(())
}
