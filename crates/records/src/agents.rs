//! Agent registry with optimistic state transitions
//!
//! Agent rows carry a `generation` counter. A transition presents the
//! generation it read; a stale generation fails with a typed error and
//! changes nothing, so two controllers racing on the same agent cannot
//! clobber each other's state.

use crate::models::now_ms;
use crate::store::{db_err, RecordStore};
use nexus_core::{NexusError, Result};
use rusqlite::{params, OptionalExtension, Row};

/// Lifecycle state of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl AgentState {
    /// Stable string form stored in the agents table
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Stopped => "stopped",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(AgentState::Idle),
            "running" => Some(AgentState::Running),
            "paused" => Some(AgentState::Paused),
            "stopped" => Some(AgentState::Stopped),
            _ => None,
        }
    }

    /// Whether this state may move to `next`
    ///
    /// Stopped is terminal; everything else may move freely except
    /// re-entering its own state (a no-op transition is rejected so a
    /// stale controller cannot silently "succeed").
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        if *self == AgentState::Stopped {
            return false;
        }
        *self != next
    }
}

/// One row of `agents`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub agent_id: String,
    pub zone_id: String,
    pub name: String,
    pub state: AgentState,
    pub generation: u64,
    pub metadata_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    let state_raw: String = row.get("state")?;
    Ok(AgentRecord {
        agent_id: row.get("agent_id")?,
        zone_id: row.get("zone_id")?,
        name: row.get("name")?,
        state: AgentState::parse(&state_raw).unwrap_or(AgentState::Idle),
        generation: row.get::<_, i64>("generation")? as u64,
        metadata_json: row.get("metadata_json")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl RecordStore {
    /// Register an agent; the id must be unused
    pub fn register_agent(
        &self,
        agent_id: &str,
        zone_id: &str,
        name: &str,
        metadata_json: Option<&str>,
    ) -> Result<AgentRecord> {
        if agent_id.is_empty() {
            return Err(NexusError::Validation("agent_id is empty".to_string()));
        }
        let now = now_ms();
        {
            let conn = self.conn.lock();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO agents \
                     (agent_id, zone_id, name, state, generation, metadata_json, \
                      created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 'idle', 0, ?4, ?5, ?5)",
                    params![agent_id, zone_id, name, metadata_json, now],
                )
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(NexusError::Conflict(format!(
                    "agent already registered: {agent_id}"
                )));
            }
        }
        self.get_agent(agent_id)?
            .ok_or_else(|| NexusError::backend("records", "agent vanished after insert"))
    }

    /// Fetch an agent by id
    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM agents WHERE agent_id = ?1",
            params![agent_id],
            row_to_agent,
        )
        .optional()
        .map_err(db_err)
    }

    /// Agents registered in a zone, by name
    pub fn list_agents(&self, zone_id: &str) -> Result<Vec<AgentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM agents WHERE zone_id = ?1 ORDER BY name")
            .map_err(db_err)?;
        let result = stmt
            .query_map(params![zone_id], row_to_agent)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        result
    }

    /// Optimistically transition an agent's state
    ///
    /// The caller presents the generation it read. On a match the state
    /// advances and the generation increments in one statement; on a
    /// mismatch nothing changes and `StaleGeneration` carries what the
    /// row actually holds.
    pub fn transition_agent(
        &self,
        agent_id: &str,
        new_state: AgentState,
        expected_generation: u64,
    ) -> Result<AgentRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let current = tx
            .query_row(
                "SELECT * FROM agents WHERE agent_id = ?1",
                params![agent_id],
                row_to_agent,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| NexusError::NotFound(format!("agent {agent_id}")))?;

        if current.generation != expected_generation {
            return Err(NexusError::StaleGeneration {
                expected: expected_generation,
                actual: current.generation,
            });
        }
        if !current.state.can_transition_to(new_state) {
            return Err(NexusError::Conflict(format!(
                "agent {agent_id} may not move from {} to {}",
                current.state.as_str(),
                new_state.as_str()
            )));
        }

        let updated: AgentRecord = tx
            .query_row(
                "UPDATE agents SET state = ?1, generation = generation + 1, updated_at = ?2 \
                 WHERE agent_id = ?3 AND generation = ?4 \
                 RETURNING *",
                params![
                    new_state.as_str(),
                    now_ms(),
                    agent_id,
                    expected_generation as i64
                ],
                row_to_agent,
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(updated)
    }

    /// Remove an agent registration
    pub fn delete_agent(&self, agent_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM agents WHERE agent_id = ?1", params![agent_id])
            .map_err(db_err)?;
        Ok(n > 0)
    }
}
