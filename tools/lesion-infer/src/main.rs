//! 眼底彩照病灶分割: 对一个目录下的所有图像做分块推理,
//! 写出 `<输出目录>/<病灶>/image<NNN>.png` 概率图.

mod args;
mod result;
mod runner;

use anyhow::Result;
use clap::Parser;
use simple_logger::SimpleLogger;

fn main() -> Result<()> {
    let args = args::Args::parse();
    SimpleLogger::new()
        .with_level(args.log_level())
        .env()
        .init()?;

    let result = runner::run(&args)?;
    result.analyze();
    result.ensure_success()
}
