//! 전송 통계

use std::time::{Duration, Instant};

use crate::Error;

/// 파일 하나의 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 파일 이름
    pub filename: String,

    /// 서버가 알려준 파일 크기
    pub file_size: u64,

    /// 시작 시간
    pub start_time: Instant,

    /// 수신 완료 바이트
    pub bytes_received: u64,

    /// 블록 요청 수 (재전송 제외)
    pub block_requests: u64,

    /// 재전송 횟수 (타임아웃 후 다시 보낸 데이터그램)
    pub retransmissions: u64,

    /// 요청과 맞지 않는 블록 응답 수
    pub mismatches: u64,

    /// CLOSE_OK 수신 여부
    pub close_acked: bool,

    finished_at: Option<Instant>,
}

impl TransferStats {
    pub fn new(filename: impl Into<String>, file_size: u64) -> Self {
        Self {
            filename: filename.into(),
            file_size,
            start_time: Instant::now(),
            bytes_received: 0,
            block_requests: 0,
            retransmissions: 0,
            mismatches: 0,
            close_acked: false,
            finished_at: None,
        }
    }

    /// 요청 하나의 결과 기록
    pub fn record_request(&mut self, attempts: u32) {
        self.block_requests += 1;
        self.retransmissions += u64::from(attempts.saturating_sub(1));
    }

    /// 블록 수신 기록
    pub fn record_block(&mut self, size: usize) {
        self.bytes_received += size as u64;
    }

    /// 불일치 응답 기록
    pub fn record_mismatch(&mut self) {
        self.mismatches += 1;
    }

    /// 전송 종료 시각 기록
    pub fn finish(&mut self) {
        self.finished_at.get_or_insert_with(Instant::now);
    }

    /// 진행률 (0.0 ~ 1.0)
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        self.bytes_received as f64 / self.file_size as f64
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        match self.finished_at {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "{} | Elapsed: {:.2}s | Bytes: {}/{} | Blocks: {} | Retransmits: {} | Mismatches: {} | Throughput: {:.2} KB/s",
            self.filename,
            self.elapsed().as_secs_f64(),
            self.bytes_received,
            self.file_size,
            self.block_requests,
            self.retransmissions,
            self.mismatches,
            self.throughput() / 1000.0,
        )
    }
}

/// 배치 전송 결과
#[derive(Debug, Default)]
pub struct BatchReport {
    /// 성공한 전송
    pub succeeded: Vec<TransferStats>,

    /// 실패한 전송 (파일 이름, 원인)
    pub failed: Vec<(String, Error)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let bytes: u64 = self.succeeded.iter().map(|s| s.bytes_received).sum();
        format!(
            "Files: {}/{} succeeded | Bytes: {} | Failed: [{}]",
            self.succeeded.len(),
            self.total(),
            bytes,
            self.failed
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_and_retransmissions() {
        let mut stats = TransferStats::new("a.txt", 2500);
        assert_eq!(stats.progress(), 0.0);

        stats.record_request(1);
        stats.record_block(1000);
        stats.record_request(3);
        stats.record_block(1000);

        assert_eq!(stats.block_requests, 2);
        assert_eq!(stats.retransmissions, 2);
        assert!((stats.progress() - 0.8).abs() < f64::EPSILON);

        stats.finish();
        let first = stats.elapsed();
        stats.finish();
        assert_eq!(stats.elapsed(), first);
    }

    #[test]
    fn test_empty_file_is_complete() {
        assert_eq!(TransferStats::new("empty", 0).progress(), 1.0);
    }

    #[test]
    fn test_batch_summary() {
        let mut report = BatchReport::default();
        report.succeeded.push(TransferStats::new("a.txt", 10));
        report.failed.push((
            "missing.txt".into(),
            Error::NotFound {
                filename: "missing.txt".into(),
            },
        ));

        assert_eq!(report.total(), 2);
        assert!(!report.all_succeeded());
        assert!(report.summary().contains("missing.txt"));
    }
}
