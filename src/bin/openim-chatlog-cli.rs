//! 本地聊天记录 CLI
//!
//! 直接读写本地 SQLite 聊天记录库，用于调试和排查问题

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use openim_chatlog::im::constant::TEXT;
use openim_chatlog::{KeywordMatch, LocalChatLog, LockMode, MessageStore, StoreConfig, TimeRange};
use tracing::info;
use uuid::Uuid;

/// 本地聊天记录 CLI
#[derive(Parser, Debug)]
#[command(name = "openim-chatlog-cli")]
#[command(about = "OpenIM 本地聊天记录 CLI - 查询、搜索与清理", long_about = None)]
struct Args {
    /// 数据库 URL
    #[arg(long, default_value = "sqlite://chat_logs.db?mode=rwc")]
    db: String,

    /// 日志级别（默认: info,openim_chatlog=debug）
    #[arg(long, default_value = "info,openim_chatlog=debug")]
    log_level: String,

    /// 额外把日志写入该文件
    #[arg(long)]
    log_file: Option<String>,

    /// 每个会话一把锁（默认全局一把锁）
    #[arg(long)]
    per_shard_lock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 写入一条本地文本消息（seq = 0）
    Send {
        conversation_id: String,
        #[arg(long)]
        sender: String,
        content: String,
    },
    /// 最近的消息
    Recent {
        conversation_id: String,
        #[arg(short, long, default_value = "20")]
        count: usize,
        #[arg(long)]
        reverse: bool,
    },
    /// 以 send_time 为游标翻页
    Before {
        conversation_id: String,
        start_time: i64,
        #[arg(short, long, default_value = "20")]
        count: usize,
        #[arg(long)]
        reverse: bool,
    },
    /// 按 client_msg_id 查询
    Get {
        conversation_id: String,
        client_msg_id: String,
    },
    /// 关键词搜索（文本消息）
    Search {
        conversation_id: String,
        keywords: Vec<String>,
        /// 0 = 任意一个关键词，1 = 全部关键词
        #[arg(long, default_value = "0")]
        match_type: i32,
        #[arg(long, default_value_t = i64::MIN)]
        start: i64,
        #[arg(long, default_value_t = i64::MAX)]
        end: i64,
    },
    /// 删除消息：不给 ID 时清空整个会话
    Delete {
        conversation_id: String,
        client_msg_ids: Vec<String>,
        /// 只标记删除，保留行
        #[arg(long)]
        soft: bool,
    },
}

/// 初始化日志（输出到 stderr，可选同时写文件；stdout 只留给 JSON 结果）
fn init_logger(log_level: &str, log_file: Option<&str>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 删除消息：soft 只改状态，不给 ID 时作用于整个会话
async fn delete_messages(
    store: &MessageStore,
    conversation_id: &str,
    client_msg_ids: &[String],
    soft: bool,
) -> Result<u64> {
    let affected = match (client_msg_ids.is_empty(), soft) {
        (false, true) => {
            store
                .soft_delete_by_client_ids(conversation_id, client_msg_ids)
                .await?
        }
        (false, false) => {
            store
                .delete_by_client_ids(conversation_id, client_msg_ids)
                .await?
        }
        (true, true) => store.soft_delete_all(conversation_id).await?,
        (true, false) => store.delete_all(conversation_id).await?,
    };
    Ok(affected)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_deref())?;

    let config = StoreConfig {
        db_url: args.db.clone(),
        lock_mode: if args.per_shard_lock {
            LockMode::PerShard
        } else {
            LockMode::Global
        },
        ..Default::default()
    };
    let store = MessageStore::new(&config)
        .await
        .with_context(|| format!("打开数据库失败: {}", args.db))?;
    info!("[CLI] 已打开数据库: {}", args.db);

    match args.command {
        Command::Send {
            conversation_id,
            sender,
            content,
        } => {
            let msg = LocalChatLog::text(
                conversation_id.as_str(),
                Uuid::new_v4().simple().to_string(),
                sender,
                content,
                Utc::now().timestamp_millis(),
            );
            store.insert(&conversation_id, &msg).await?;
            print_json(&msg)?;
        }
        Command::Recent {
            conversation_id,
            count,
            reverse,
        } => {
            let msgs = store.list_recent(&conversation_id, count, reverse).await?;
            print_json(&msgs)?;
        }
        Command::Before {
            conversation_id,
            start_time,
            count,
            reverse,
        } => {
            let msgs = store
                .list_before(&conversation_id, count, start_time, reverse)
                .await?;
            print_json(&msgs)?;
        }
        Command::Get {
            conversation_id,
            client_msg_id,
        } => {
            let msg = store.get_by_client_id(&conversation_id, &client_msg_id).await?;
            print_json(&msg)?;
        }
        Command::Search {
            conversation_id,
            keywords,
            match_type,
            start,
            end,
        } => {
            let mode = KeywordMatch::try_from(match_type)?;
            let msgs = store
                .search_all(
                    &[TEXT],
                    &conversation_id,
                    keywords.as_slice(),
                    mode,
                    TimeRange::new(start, end),
                )
                .await?;
            info!("[CLI] 搜索到 {} 条消息", msgs.len());
            print_json(&msgs)?;
        }
        Command::Delete {
            conversation_id,
            client_msg_ids,
            soft,
        } => {
            let affected =
                delete_messages(&store, &conversation_id, &client_msg_ids, soft).await?;
            info!("[CLI] 影响 {} 行", affected);
        }
    }

    Ok(())
}
