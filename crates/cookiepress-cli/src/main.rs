use std::collections::HashMap;
use std::error::Error;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cookiepress_jobs::Job;

type DynError = Box<dyn Error>;
type Flags = HashMap<String, String>;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

#[tokio::main]
async fn main() -> Result<(), DynError> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    match args[0].as_str() {
        "press" => run_press(&args[1..]).await,
        "job" => run_job(&args[1..]).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// Drives the whole press flow: submit the prompt, list the candidate
/// designs, pick one by index, print both download URLs.
async fn run_press(args: &[String]) -> Result<(), DynError> {
    let flags = parse_flags(args)?;
    let prompt = required_str(&flags, "--prompt")?;
    let pick = optional_usize(&flags, "--pick", 0)?;
    let server = optional_str(&flags, "--server", DEFAULT_SERVER);

    let client = ApiClient::new(server);
    let mut flow = FlowMachine::new();

    flow.submit()?;
    println!("generating designs for {prompt:?} ...");
    let batch = match client.generate_image(prompt).await {
        Ok(batch) => batch,
        Err(err) => {
            flow.generation_failed()?;
            return Err(err.into());
        }
    };

    flow.designs_ready(batch.designs.clone())?;
    println!("candidates:");
    for (index, design) in batch.designs.iter().enumerate() {
        println!("  [{index}] {}", design.url);
    }

    let selected_url = flow.select(pick)?;
    println!("converting candidate [{pick}] ...");
    let urls = match client
        .run_conversion(&selected_url, Some(&batch.job_id))
        .await
    {
        Ok(urls) => urls,
        Err(err) => {
            flow.conversion_failed()?;
            return Err(err.into());
        }
    };

    flow.files_ready(urls.cutter_stl_url.clone(), urls.stamp_stl_url.clone())?;
    println!("job     {}", batch.job_id);
    println!("cutter  {server}{}", urls.cutter_stl_url);
    println!("stamp   {server}{}", urls.stamp_stl_url);
    Ok(())
}

async fn run_job(args: &[String]) -> Result<(), DynError> {
    let flags = parse_flags(args)?;
    let id = required_str(&flags, "--id")?;
    let server = optional_str(&flags, "--server", DEFAULT_SERVER);

    let job = ApiClient::new(server).job(id).await?;
    println!("id       {}", job.id);
    println!("prompt   {}", job.prompt);
    println!("status   {}", job.status.as_str());
    println!("image    {}", job.image_url.as_deref().unwrap_or("-"));
    println!("cutter   {}", job.cutter_stl_url.as_deref().unwrap_or("-"));
    println!("stamp    {}", job.stamp_stl_url.as_deref().unwrap_or("-"));
    println!("created  {}", job.created_at);
    Ok(())
}

/// One candidate design as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Design {
    pub file: String,
    pub url: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("no design at index {index}; {count} candidates are available")]
    UnknownDesign { index: usize, count: usize },
}

/// Press flow states. Each state carries exactly the data the flow has
/// accumulated so far; rolling back drops only what the failed step added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Idle,
    Generating,
    Selecting {
        designs: Vec<Design>,
    },
    Processing {
        designs: Vec<Design>,
        selected_url: String,
    },
    Ready {
        cutter_stl_url: String,
        stamp_stl_url: String,
    },
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::Idle => "idle",
            Flow::Generating => "generating",
            Flow::Selecting { .. } => "selecting",
            Flow::Processing { .. } => "processing",
            Flow::Ready { .. } => "ready",
        }
    }
}

/// The client-side state machine behind the press flow:
///
/// `Idle -> Generating -> Selecting -> Processing -> Ready`
///
/// Generation failure rolls back to `Idle`; conversion failure rolls back to
/// `Selecting` with the candidates retained. An illegal transition leaves the
/// state untouched and reports the attempted action.
#[derive(Debug, Default)]
pub struct FlowMachine {
    state: Flow,
}

impl Default for Flow {
    fn default() -> Self {
        Flow::Idle
    }
}

impl FlowMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Flow {
        &self.state
    }

    pub fn submit(&mut self) -> Result<(), FlowError> {
        match self.state {
            Flow::Idle => {
                self.state = Flow::Generating;
                Ok(())
            }
            _ => Err(self.rejected("submit a prompt")),
        }
    }

    pub fn designs_ready(&mut self, designs: Vec<Design>) -> Result<(), FlowError> {
        match self.state {
            Flow::Generating => {
                self.state = Flow::Selecting { designs };
                Ok(())
            }
            _ => Err(self.rejected("accept generated designs")),
        }
    }

    pub fn generation_failed(&mut self) -> Result<(), FlowError> {
        match self.state {
            Flow::Generating => {
                self.state = Flow::Idle;
                Ok(())
            }
            _ => Err(self.rejected("roll back a failed generation")),
        }
    }

    /// Picks a candidate by index and returns its URL.
    pub fn select(&mut self, index: usize) -> Result<String, FlowError> {
        match std::mem::take(&mut self.state) {
            Flow::Selecting { designs } => {
                let Some(design) = designs.get(index) else {
                    let count = designs.len();
                    self.state = Flow::Selecting { designs };
                    return Err(FlowError::UnknownDesign { index, count });
                };
                let selected_url = design.url.clone();
                self.state = Flow::Processing {
                    designs,
                    selected_url: selected_url.clone(),
                };
                Ok(selected_url)
            }
            other => {
                self.state = other;
                Err(self.rejected("select a design"))
            }
        }
    }

    pub fn conversion_failed(&mut self) -> Result<(), FlowError> {
        match std::mem::take(&mut self.state) {
            Flow::Processing { designs, .. } => {
                self.state = Flow::Selecting { designs };
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.rejected("roll back a failed conversion"))
            }
        }
    }

    pub fn files_ready(
        &mut self,
        cutter_stl_url: String,
        stamp_stl_url: String,
    ) -> Result<(), FlowError> {
        match self.state {
            Flow::Processing { .. } => {
                self.state = Flow::Ready {
                    cutter_stl_url,
                    stamp_stl_url,
                };
                Ok(())
            }
            _ => Err(self.rejected("accept finished files")),
        }
    }

    pub fn reset(&mut self) -> Result<(), FlowError> {
        match self.state {
            Flow::Ready { .. } => {
                self.state = Flow::Idle;
                Ok(())
            }
            _ => Err(self.rejected("reset the flow")),
        }
    }

    fn rejected(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response from server: {0}")]
    MalformedResponse(String),
}

/// One generation batch as returned by the server.
#[derive(Debug)]
pub struct GeneratedBatch {
    pub job_id: String,
    pub designs: Vec<Design>,
}

/// Both download URLs from a finished conversion.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionUrls {
    pub cutter_stl_url: String,
    pub stamp_stl_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateImageRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    image_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateImageResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    designs: Vec<Design>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Thin blocking-free client for the server's JSON API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn generate_image(&self, prompt: &str) -> Result<GeneratedBatch, ClientError> {
        let response: GenerateImageResponse = self
            .post("/api/generate-image", &GenerateImageRequest { prompt })
            .await?;
        if !response.success || response.designs.is_empty() {
            return Err(ClientError::MalformedResponse(
                "generation reported no designs".to_string(),
            ));
        }
        Ok(GeneratedBatch {
            job_id: response.job_id,
            designs: response.designs,
        })
    }

    pub async fn run_conversion(
        &self,
        image_url: &str,
        job_id: Option<&str>,
    ) -> Result<ConversionUrls, ClientError> {
        self.post("/api/run", &RunRequest { image_url, job_id })
            .await
    }

    pub async fn job(&self, id: &str) -> Result<Job, ClientError> {
        let url = self.endpoint(&format!("/api/job/{id}"));
        let wrap = |source| ClientError::Http {
            url: url.clone(),
            source,
        };

        let response = self.http.get(&url).send().await.map_err(wrap)?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), response).await);
        }
        response.json().await.map_err(wrap)
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let wrap = |source| ClientError::Http {
            url: url.clone(),
            source,
        };

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(wrap)?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), response).await);
        }
        response.json().await.map_err(wrap)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

async fn api_error(status: u16, response: reqwest::Response) -> ClientError {
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_else(|| "no error detail".to_string());
    ClientError::Api { status, message }
}

fn parse_flags(args: &[String]) -> Result<Flags, DynError> {
    if !args.len().is_multiple_of(2) {
        return Err("expected flag-value pairs".into());
    }

    let mut flags = HashMap::new();
    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        if !flag.starts_with("--") {
            return Err(format!("expected flag at position {}", index + 1).into());
        }
        let value = args[index + 1].clone();
        if flags.insert(flag.to_string(), value).is_some() {
            return Err(format!("duplicate flag: {flag}").into());
        }
        index += 2;
    }
    Ok(flags)
}

fn required_str<'a>(flags: &'a Flags, key: &str) -> Result<&'a str, DynError> {
    flags
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| format!("missing required {key}").into())
}

fn optional_usize(flags: &Flags, key: &str, default: usize) -> Result<usize, DynError> {
    match flags.get(key) {
        Some(value) => value
            .parse::<usize>()
            .map_err(|err| format!("invalid usize for {key}: {err}").into()),
        None => Ok(default),
    }
}

fn optional_str<'a>(flags: &'a Flags, key: &str, default: &'a str) -> &'a str {
    flags.get(key).map(String::as_str).unwrap_or(default)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  cookiepress-cli press --prompt <text> [--pick <usize>] [--server <url>]"
    );
    eprintln!("  cookiepress-cli job --id <id> [--server <url>]");
}
