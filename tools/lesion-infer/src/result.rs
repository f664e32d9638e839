//! 推理结果.

use anyhow::{bail, Result};
use retina_berry::RunReport;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

/// 将 `report` 的结果写进 `w` 中.
fn describe_into<W: Write>(r: &InferResult, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.3}"),
            None => "/".to_string(),
        }
    }

    let report = &r.report;
    let ms = r.elapsed.as_secs_f64() * 1000.0;
    let avg = (report.total() > 0).then(|| ms / report.total() as f64);

    writeln!(w, "Inference into `{}`:", r.output_dir.display())?;
    writeln!(w, "{S4}Images: {}", report.total())?;
    writeln!(w, "{S4}Succeeded: {}", report.succeeded().len())?;
    writeln!(w, "{S4}Failed: {}", report.failed().len())?;
    writeln!(w, "{S4}Total time: {ms:.3} ms")?;
    write!(w, "{S4}Average time: {} ms per image", f64_to_display(avg))?;
    for f in report.failed() {
        write!(w, "\n{S4}#{:03} {}: {}", f.id, f.path.display(), f.error)?;
    }
    Ok(())
}

/// 一次推理运行的最终结果.
#[derive(Debug)]
pub struct InferResult {
    report: RunReport,
    elapsed: Duration,
    output_dir: PathBuf,
}

impl InferResult {
    pub fn new(report: RunReport, elapsed: Duration, output_dir: PathBuf) -> Self {
        Self {
            report,
            elapsed,
            output_dir,
        }
    }

    /// 输出运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);
        match describe_into(self, &mut buf) {
            Ok(()) => println!("{}", String::from_utf8_lossy(&buf)),
            Err(e) => log::error!("Cannot describe the result: {e}"),
        }
        utils::sep();
    }

    /// 有图像失败时返回错误.
    pub fn ensure_success(&self) -> Result<()> {
        let failed = self.report.failed().len();
        if failed > 0 {
            bail!("{failed} of {} images failed", self.report.total());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{describe_into, InferResult};
    use retina_berry::{RunReport, SegError};
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_describe_and_exit_status() {
        let mut report = RunReport::default();
        report.record(1, Path::new("a.png"), Ok(()));
        let r = InferResult::new(report, Duration::from_millis(10), "out".into());
        assert!(r.ensure_success().is_ok());

        let mut report = RunReport::default();
        report.record(1, Path::new("a.png"), Ok(()));
        let err = SegError::io("b.png", std::io::Error::other("gone"));
        report.record(2, Path::new("b.png"), Err(err));
        let r = InferResult::new(report, Duration::from_millis(10), "out".into());
        assert!(r.ensure_success().is_err());

        let mut buf = Vec::new();
        describe_into(&r, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Succeeded: 1"));
        assert!(text.contains("Failed: 1"));
        assert!(text.contains("#002 b.png"));
    }
}
