use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use chrono::{Local, NaiveDateTime};
use quire_core::{ExportFormat, FileGateway, PersistenceGateway, SessionConfig, WorkspaceSession};
use quire_project::{
    current_timestamp_ms, flatten_tree, tree, write_atomic, NewNode, Node, NodeId, NodeKind,
    WorkspaceId,
};
use quire_settings::{Preferences, PreferencesStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_WORKSPACE_FILE: &str = "quire-workspace.json";

#[derive(Parser)]
#[command(
    name = "quire",
    about = "Command-line access to Quire workspaces",
    author,
    version
)]
struct Cli {
    /// 工作區快照檔案。 / JSON snapshot holding the workspace data.
    #[arg(long, global = true, value_name = "PATH")]
    workspace_file: Option<PathBuf>,

    /// 要操作的工作區識別碼。 / Workspace id to operate on.
    #[arg(long, global = true, value_name = "ID", default_value = "default")]
    workspace: String,

    /// 偏好設定檔案；預設位於快照旁。 / Preferences file; defaults to one next to the snapshot.
    #[arg(long, global = true, value_name = "PATH")]
    preferences: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 建立空白的工作區快照。 / Create an empty workspace snapshot.
    Init,
    /// 以樹狀顯示工作區。 / Print the workspace tree.
    Tree(TreeArgs),
    /// 建立節點。 / Create a node.
    Create(CreateArgs),
    /// 移動節點至新的父節點或位置。 / Move a node to another parent or position.
    Move(MoveArgs),
    /// 重新命名節點。 / Rename a node.
    Rename(RenameArgs),
    /// 刪除節點與其子樹。 / Delete a node and its subtree.
    Delete(NodeArg),
    /// 依指定順序排列同層節點。 / Reorder siblings in the given sequence.
    Reorder(ReorderArgs),
    /// 新增或移除標籤。 / Add or remove tags.
    Tag(TagArgs),
    /// 收合或展開資料夾。 / Collapse or expand a folder.
    Collapse(CollapseArgs),
    /// 複製節點與其內容。 / Duplicate a node with its content.
    Duplicate(DuplicateArgs),
    /// 寫入文件內容（經由自動儲存流程）。 / Write document content through the autosave path.
    Write(WriteArgs),
    /// 顯示文件內容。 / Print the stored content of a document.
    Show(NodeArg),
    /// 全文搜尋（含權重排序）。 / Ranked full-text search.
    Search(SearchArgs),
    /// 快速子字串搜尋。 / Fast substring search.
    Find(SearchArgs),
    /// 依標籤或類型列出節點。 / List nodes filtered by tag or kind.
    List(ListArgs),
    /// 在日期資料夾下建立日記。 / Create a diary entry under its date folders.
    Diary(DiaryArgs),
    /// 匯出工作區為 JSON、Markdown 或 Org。 / Export the workspace as JSON, Markdown or Org.
    Export(ExportArgs),
}

#[derive(Args)]
struct TreeArgs {
    /// 忽略收合狀態，展開所有資料夾。 / Ignore collapse flags and show every folder open.
    #[arg(long)]
    expand_all: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindChoice {
    File,
    Folder,
    Diary,
    Canvas,
}

impl From<KindChoice> for NodeKind {
    fn from(choice: KindChoice) -> Self {
        match choice {
            KindChoice::File => NodeKind::File,
            KindChoice::Folder => NodeKind::Folder,
            KindChoice::Diary => NodeKind::Diary,
            KindChoice::Canvas => NodeKind::Canvas,
        }
    }
}

#[derive(Args)]
struct CreateArgs {
    /// 節點標題。 / Title of the new node.
    title: String,

    /// 節點類型。 / Kind of node.
    #[arg(long, value_enum, default_value = "file")]
    kind: KindChoice,

    /// 父資料夾識別碼；略過時建立於根層。 / Parent folder id; omitted for a root node.
    #[arg(long, value_name = "ID")]
    parent: Option<String>,

    /// 指定識別碼；預設自動產生。 / Explicit id; generated when omitted.
    #[arg(long, value_name = "ID")]
    id: Option<String>,

    /// 初始標籤，可重複指定。 / Initial tags (repeatable).
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
}

#[derive(Args)]
struct MoveArgs {
    /// 要移動的節點。 / Node to move.
    id: String,

    /// 新的父資料夾；略過時移至根層。 / New parent folder; omitted moves to the root.
    #[arg(long, value_name = "ID")]
    parent: Option<String>,

    /// 在新群組中的位置；略過時附加至尾端。 / Position in the new group; appended when omitted.
    #[arg(long)]
    order: Option<u32>,
}

#[derive(Args)]
struct RenameArgs {
    id: String,
    title: String,
}

#[derive(Args)]
struct NodeArg {
    id: String,
}

#[derive(Args)]
struct ReorderArgs {
    /// 同一層節點的新順序。 / Sibling ids in their new order.
    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(Args)]
struct TagArgs {
    id: String,

    #[arg(long = "add", value_name = "TAG")]
    add: Vec<String>,

    #[arg(long = "remove", value_name = "TAG")]
    remove: Vec<String>,
}

#[derive(Args)]
struct CollapseArgs {
    id: String,

    /// 改為展開。 / Expand instead of collapsing.
    #[arg(long)]
    expand: bool,
}

#[derive(Args)]
struct DuplicateArgs {
    id: String,

    /// 副本的識別碼；預設自動產生。 / Id of the copy; generated when omitted.
    #[arg(long = "as", value_name = "ID")]
    new_id: Option<String>,
}

#[derive(Args)]
struct WriteArgs {
    id: String,

    /// 直接指定內容。 / Content given inline.
    #[arg(long, conflicts_with = "file")]
    text: Option<String>,

    /// 從檔案讀取內容；兩者皆略過時讀取標準輸入。 / Read content from a file; stdin when neither is given.
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    /// 最多顯示的結果數。 / Maximum number of results.
    #[arg(long)]
    limit: Option<usize>,

    /// 搜尋所有工作區。 / Search every workspace in the snapshot.
    #[arg(long)]
    all_workspaces: bool,

    /// 以 JSON 輸出結果。 / Print results as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ListArgs {
    /// 僅列出帶有此標籤的節點。 / Only nodes carrying this tag.
    #[arg(long, value_name = "TAG")]
    tag: Option<String>,

    /// 僅列出此類型的節點。 / Only nodes of this kind.
    #[arg(long, value_enum)]
    kind: Option<KindChoice>,
}

#[derive(Args)]
struct DiaryArgs {
    /// 日記時間（YYYY-MM-DDTHH:MM:SS）；預設為現在。 / Entry time (YYYY-MM-DDTHH:MM:SS); defaults to now.
    #[arg(long, value_name = "DATETIME")]
    at: Option<NaiveDateTime>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Json,
    #[value(alias = "md")]
    Markdown,
    Org,
}

impl From<FormatChoice> for ExportFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Json => ExportFormat::Json,
            FormatChoice::Markdown => ExportFormat::Markdown,
            FormatChoice::Org => ExportFormat::Org,
        }
    }
}

#[derive(Args)]
struct ExportArgs {
    /// 輸出格式。 / Output format.
    #[arg(long, value_enum, default_value = "markdown")]
    format: FormatChoice,

    /// 只匯出此節點的子樹。 / Export only the subtree rooted at this node.
    #[arg(long, value_name = "ID")]
    root: Option<String>,

    /// 寫入檔案；略過時輸出至標準輸出。 / Write to a file instead of stdout.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUIRE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let workspace_file = resolve_path(
        cli.workspace_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_FILE)),
    )?;
    let workspace_id = WorkspaceId::new(cli.workspace);

    if let Commands::Init = cli.command {
        return execute_init(&workspace_file);
    }

    let preferences_path = match cli.preferences {
        Some(path) => resolve_path(path)?,
        None => preferences_path(&workspace_file),
    };
    let preferences = PreferencesStore::load(&preferences_path)
        .with_context(|| format!("load preferences from {}", preferences_path.display()))?;
    let mut session = open_session(&workspace_file, &workspace_id, preferences.preferences()).await?;

    match cli.command {
        Commands::Init => return execute_init(&workspace_file),
        Commands::Tree(args) => print_tree(&session, &workspace_id, args.expand_all),
        Commands::Create(args) => execute_create(&mut session, &workspace_id, args)?,
        Commands::Move(args) => {
            let parent = args.parent.map(NodeId::new);
            let outcome = session
                .move_node(&NodeId::new(args.id), parent.as_ref(), args.order)
                .context("move node")?;
            println!(
                "Moved {} to {} at position {}",
                outcome.node.id,
                describe_parent(outcome.node.parent_id.as_ref()),
                outcome.node.order
            );
        }
        Commands::Rename(args) => {
            let node = session
                .rename_node(&NodeId::new(args.id), &args.title)
                .context("rename node")?;
            println!("Renamed {} to \"{}\"", node.id, node.title);
        }
        Commands::Delete(args) => {
            let removed = session
                .delete_node(&NodeId::new(args.id))
                .context("delete node")?;
            println!("Deleted {} node(s)", removed.len());
        }
        Commands::Reorder(args) => {
            let ids: Vec<NodeId> = args.ids.into_iter().map(NodeId::new).collect();
            let orders = session.reorder_nodes(&ids).context("reorder nodes")?;
            for (id, order) in orders {
                println!("{order}: {id}");
            }
        }
        Commands::Tag(args) => execute_tag(&mut session, args)?,
        Commands::Collapse(args) => {
            let id = NodeId::new(args.id);
            session
                .set_collapsed(&id, !args.expand)
                .context("update folder state")?;
            let state = if args.expand { "Expanded" } else { "Collapsed" };
            println!("{state} {id}");
        }
        Commands::Duplicate(args) => {
            let source = NodeId::new(args.id);
            let kind = session
                .store()
                .node(&source)
                .map(|node| node.kind)
                .unwrap_or(NodeKind::File);
            let new_id = args
                .new_id
                .map(NodeId::new)
                .unwrap_or_else(|| generate_id(&session, kind));
            let node = session
                .duplicate_node(&source, new_id)
                .context("duplicate node")?;
            println!("Created {} \"{}\"", node.id, node.title);
        }
        Commands::Write(args) => execute_write(&mut session, args)?,
        Commands::Show(args) => {
            let id = NodeId::new(args.id);
            match session.store().content(&id) {
                Some(content) => println!("{}", content.body),
                None => bail!("{id} has no content"),
            }
        }
        Commands::Search(args) => execute_search(&mut session, &workspace_id, args)?,
        Commands::Find(args) => execute_find(&session, &workspace_id, args)?,
        Commands::List(args) => execute_list(&session, &workspace_id, args),
        Commands::Diary(args) => {
            let at = args.at.unwrap_or_else(|| Local::now().naive_local());
            let mut next_id = id_generator(&session);
            let node = session
                .create_diary(&workspace_id, at, &mut next_id)
                .context("create diary entry")?;
            println!("Created diary {} \"{}\"", node.id, node.title);
        }
        Commands::Export(args) => execute_export(&session, &workspace_id, args)?,
    }

    finish(&mut session).await
}

fn execute_init(workspace_file: &Path) -> Result<()> {
    if workspace_file.exists() {
        println!("Workspace file {} already exists", workspace_file.display());
        return Ok(());
    }
    let gateway = FileGateway::open(workspace_file).context("open workspace file")?;
    gateway.persist().context("write workspace file")?;
    println!("Initialized workspace file {}", workspace_file.display());
    Ok(())
}

async fn open_session(
    workspace_file: &Path,
    workspace_id: &WorkspaceId,
    preferences: &Preferences,
) -> Result<WorkspaceSession> {
    if !workspace_file.exists() {
        bail!(
            "workspace file {} does not exist; run `quire init` first",
            workspace_file.display()
        );
    }
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(
        FileGateway::open(workspace_file)
            .with_context(|| format!("open {}", workspace_file.display()))?,
    );
    let mut session = WorkspaceSession::new(gateway, SessionConfig::from(preferences));
    let count = session
        .load_workspace(workspace_id)
        .await
        .context("load workspace")?;
    info!(workspace = %workspace_id, nodes = count, "session ready");
    Ok(session)
}

/// Flushes pending writes and reports anything the backend refused.
async fn finish(session: &mut WorkspaceSession) -> Result<()> {
    let report = session.shutdown().await;
    let failures = session.take_sync_failures();
    if let Some(failure) = failures.first() {
        bail!(
            "backend rejected {} of {}: {}",
            failure.action,
            failure.node_id,
            failure.error
        );
    }
    if let Some((node_id, error)) = report.failed.first() {
        bail!("failed to save {node_id}: {error}");
    }
    Ok(())
}

fn print_tree(session: &WorkspaceSession, workspace_id: &WorkspaceId, expand_all: bool) {
    let forest = session.store().forest(workspace_id);
    if forest.is_empty() {
        println!("(empty workspace)");
        return;
    }
    let expanded: HashSet<NodeId> = session
        .store()
        .nodes_in_workspace(workspace_id)
        .into_iter()
        .filter(|node| node.is_folder() && (expand_all || !node.collapsed))
        .map(|node| node.id.clone())
        .collect();
    for row in flatten_tree(&forest, &expanded) {
        let marker = match (row.node.is_folder(), expanded.contains(&row.node.id)) {
            (true, true) => "v ",
            (true, false) => "> ",
            (false, _) => "- ",
        };
        let tags = if row.node.tags.is_empty() {
            String::new()
        } else {
            let joined: Vec<&str> = row.node.tags.iter().map(String::as_str).collect();
            format!(" #{}", joined.join(" #"))
        };
        println!(
            "{}{}{} [{}]{}",
            "  ".repeat(row.depth),
            marker,
            row.node.title,
            row.node.id,
            tags
        );
    }
}

fn execute_create(
    session: &mut WorkspaceSession,
    workspace_id: &WorkspaceId,
    args: CreateArgs,
) -> Result<()> {
    let kind = NodeKind::from(args.kind);
    let id = match args.id {
        Some(id) => NodeId::new(id),
        None => generate_id(session, kind),
    };
    let mut draft = NewNode::new(id, workspace_id.clone(), kind, args.title);
    if let Some(parent) = args.parent {
        draft = draft.under(parent);
    }
    for tag in args.tags {
        draft = draft.with_tag(tag);
    }
    let node = session.create_node(draft).context("create node")?;
    println!("Created {} {} \"{}\"", node.kind, node.id, node.title);
    Ok(())
}

fn execute_tag(session: &mut WorkspaceSession, args: TagArgs) -> Result<()> {
    if args.add.is_empty() && args.remove.is_empty() {
        bail!("nothing to do; pass --add or --remove");
    }
    let id = NodeId::new(args.id);
    for tag in &args.add {
        session.add_tag(&id, tag).context("add tag")?;
    }
    for tag in &args.remove {
        session.remove_tag(&id, tag).context("remove tag")?;
    }
    if let Some(node) = session.store().node(&id) {
        let tags: Vec<&str> = node.tags.iter().map(String::as_str).collect();
        println!("{}: {}", node.id, tags.join(", "));
    }
    Ok(())
}

fn execute_write(session: &mut WorkspaceSession, args: WriteArgs) -> Result<()> {
    let body = match (args.text, args.file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("read content from stdin")?;
            buffer
        }
    };
    let id = NodeId::new(args.id);
    session
        .update_content(&id, body)
        .context("update content")?;
    if session.has_unsaved_changes(&id) {
        println!("Updated {id}");
    } else {
        println!("No changes for {id}");
    }
    Ok(())
}

fn execute_search(
    session: &mut WorkspaceSession,
    workspace_id: &WorkspaceId,
    args: SearchArgs,
) -> Result<()> {
    let scope = (!args.all_workspaces).then_some(workspace_id);
    let mut hits = session.search(&args.query, scope);
    if let Some(limit) = args.limit {
        hits.truncate(limit);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No matches found.");
        return Ok(());
    }
    println!("Search \"{}\" ({} results)", args.query, hits.len());
    for hit in &hits {
        println!("  {:>7.2}  {} [{}]", hit.score, hit.title, hit.node_id);
        if !hit.excerpt.text.is_empty() {
            println!("           {}", hit.excerpt.text);
        }
    }
    Ok(())
}

fn execute_find(
    session: &WorkspaceSession,
    workspace_id: &WorkspaceId,
    args: SearchArgs,
) -> Result<()> {
    let scope = (!args.all_workspaces).then_some(workspace_id);
    let mut hits = session.simple_search(&args.query, scope);
    if let Some(limit) = args.limit {
        hits.truncate(limit);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No matches found.");
        return Ok(());
    }
    for hit in &hits {
        let field = serde_json::to_value(hit.field)?;
        println!(
            "  {} [{}] ({} at {})",
            hit.title,
            hit.node_id,
            field.as_str().unwrap_or_default(),
            hit.position
        );
    }
    Ok(())
}

fn execute_list(session: &WorkspaceSession, workspace_id: &WorkspaceId, args: ListArgs) {
    let nodes: Vec<Node> = session
        .store()
        .nodes_in_workspace(workspace_id)
        .into_iter()
        .cloned()
        .collect();
    let mut matches: Vec<&Node> = match args.kind {
        Some(kind) => tree::filter_by_kind(&nodes, kind.into()),
        None => nodes.iter().collect(),
    };
    if let Some(tag) = &args.tag {
        let tagged: HashSet<&NodeId> = tree::filter_by_tag(&nodes, tag)
            .into_iter()
            .map(|node| &node.id)
            .collect();
        matches.retain(|node| tagged.contains(&node.id));
    }
    if matches.is_empty() {
        println!("No matching nodes.");
        return;
    }
    matches.sort_by(|a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    for node in matches {
        println!("  {} {} [{}]", node.kind, node.title, node.id);
    }
}

fn execute_export(
    session: &WorkspaceSession,
    workspace_id: &WorkspaceId,
    args: ExportArgs,
) -> Result<()> {
    let format = ExportFormat::from(args.format);
    let root = args.root.map(NodeId::new);
    let document = session
        .export(workspace_id, root.as_ref(), format)
        .context("export workspace")?;
    match args.output {
        Some(path) => {
            let path = resolve_path(path)?;
            write_atomic(&path, document.as_bytes())
                .with_context(|| format!("write {}", path.display()))?;
            println!("Exported {format} to {}", path.display());
        }
        None => print!("{document}"),
    }
    Ok(())
}

fn describe_parent(parent: Option<&NodeId>) -> String {
    match parent {
        Some(id) => id.to_string(),
        None => "root".to_string(),
    }
}

fn generate_id(session: &WorkspaceSession, kind: NodeKind) -> NodeId {
    let mut next_id = id_generator(session);
    next_id(kind)
}

/// Hands out `{kind}-{timestamp}` ids, adding a suffix on collision. Ids
/// already handed out count as taken.
fn id_generator(session: &WorkspaceSession) -> impl FnMut(NodeKind) -> NodeId {
    let stamp = current_timestamp_ms();
    let mut taken: HashSet<NodeId> = session.store().nodes().map(|node| node.id.clone()).collect();
    move |kind| {
        let mut suffix = 0u32;
        loop {
            let candidate = if suffix == 0 {
                NodeId::new(format!("{}-{stamp}", kind.name()))
            } else {
                NodeId::new(format!("{}-{stamp}-{suffix}", kind.name()))
            };
            if taken.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

fn preferences_path(workspace_file: &Path) -> PathBuf {
    workspace_file.with_file_name("quire-preferences.json")
}

fn resolve_path(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
