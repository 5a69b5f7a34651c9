mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use cli::{Args, CliOperator};
use ranobe_epub::orchestrator::{list_sessions, App};
use ranobe_epub::{logger, Config};

#[tokio::main]
async fn main() -> ExitCode {
    // 先解析参数，--help 不需要日志
    let args = Args::parse();

    // 加载配置
    let config = Config::load(args.config.as_deref());

    // 初始化日志
    let verbose = args.verbose || config.as_ref().is_ok_and(|c| c.verbose_logging);
    logger::init(verbose);

    match run(args, config.map_err(Into::into)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: Result<Config>) -> Result<()> {
    let config = config?;

    if args.list_sessions {
        let sessions = list_sessions(&config).await?;
        if sessions.is_empty() {
            info!("没有可以继续的会话 ({})", config.progress_dir.display());
        }
        for (key, completed) in sessions {
            info!("💾 {} - 已完成 {} 章", key, completed);
        }
        return Ok(());
    }

    let url = match args.url.clone() {
        Some(url) => url,
        None => cli::prompt_url()?,
    };

    // 初始化并运行应用
    let app = App::initialize(config, CliOperator::new(args))?;
    app.run(&url).await?;

    Ok(())
}
