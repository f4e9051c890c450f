pub use self::{
    balancer_type::{
        Balancer_Pool_Type, Balancer_Token_Type, Pool_Share_Type,
        Transaction_Type,
    },
    graph_response::{GraphError, GraphResponse, Meta, PriceValue},
    rewards_type::{Reward_Type, Stake_Position_Snapshot_Type},
    uniswap_type::{
        IdRef, LP_Transfer_Type, Pair_State_Type, Pair_Tokens_Type,
        Position_Snapshot_Type, Token_Type,
    },
};

mod balancer_type;
mod graph_response;
mod rewards_type;
mod uniswap_type;
